// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From annotation files to tensor batches:
//
//   train.jsonl / val.jsonl
//       │
//       ▼
//   JsonlPairSource   → PairRecords, split train/validation
//       │
//       ▼
//   Preprocessor      → cleaned captions, resized normalised images
//       │
//       ▼
//   SiameseDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   PairBatcher       → stacks samples into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to the epoch runner

/// Reads .jsonl annotation files under a dataset root
pub mod loader;

/// Caption cleaning and image preprocessing
pub mod preprocessor;

/// Implements Burn's Dataset trait for image–text pairs
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Seeded train/validation split
pub mod splitter;
