// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File-backed concerns shared by the other layers:
//
//   checkpoint.rs       safetensors weights and the run's
//                       train_config.json
//
//   tokenizer_store.rs  word-level tokenizer built from the
//                       training captions, saved as
//                       tokenizer.json and reused by later runs
//
//   metrics.rs          loss_history.csv and best-epoch
//                       checkpointing

/// Weights and config persistence
pub mod checkpoint;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Per-epoch loss history
pub mod metrics;
