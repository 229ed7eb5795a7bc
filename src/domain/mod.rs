// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing what the trainer
// works with: image–text pairs, dataset splits and named
// parameter snapshots.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits

// An (image, text, label) record and the train/val split
pub mod pair;

// Named parameter snapshot used for checkpoints and partial loading
pub mod state_dict;

// Core abstractions (traits) that other layers implement
pub mod traits;
