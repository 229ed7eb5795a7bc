// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The application layer depends on these traits rather than on
// concrete loaders, so a different dataset layout only needs a
// new implementation.

use anyhow::Result;

use crate::domain::pair::DatasetSplits;

// ─── PairSource ───────────────────────────────────────────────────────────────
/// Any component that can produce train/validation image–text pairs.
///
/// Implementations:
///   - JsonlPairSource → `train.jsonl` / `val.jsonl` under a dataset root
pub trait PairSource {
    /// Load both splits. Fails when the source is missing or empty.
    fn load_splits(&self) -> Result<DatasetSplits>;
}
