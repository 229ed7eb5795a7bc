// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles records with a seeded RNG and splits them into a
// training set and a validation set. The same seed always gives
// the same split, so restarting a run from its best checkpoint
// keeps validating on the same pairs.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` with `seed` and split into (train, validation).
///
/// # Arguments
/// * `samples`        - All available samples (consumed by this function)
/// * `train_fraction` - Proportion for training, e.g. 0.9 = 90%
/// * `seed`           - RNG seed for the shuffle
///
/// With two or more samples both sides keep at least one sample,
/// unless `train_fraction` is exactly 1.0.
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let mut split_at = ((total as f64) * train_fraction).round() as usize;
    split_at = split_at.min(total);

    if total >= 2 && train_fraction < 1.0 {
        split_at = split_at.clamp(1, total - 1);
    }

    // split_off(n) removes elements [n..] from the Vec and returns them
    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation ({}% / {}%)",
        samples.len(),
        val.len(),
        (samples.len() * 100) / total.max(1),
        (val.len()     * 100) / total.max(1),
    );

    (samples, val)
}
