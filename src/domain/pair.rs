// ============================================================
// Layer 3 — Pair Domain Types
// ============================================================
// One training example is an image, a caption describing it and
// an integer label. Pairs that share a label are treated as
// positives for each other by the contrastive loss; a record with
// a label of its own is only positive with itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single (image, text, label) triple, before any decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    /// Absolute (or root-resolved) path of the image file
    pub image: PathBuf,

    /// Caption paired with the image
    pub text: String,

    /// Group label; equal labels mark matching pairs
    pub label: i64,
}

impl PairRecord {
    pub fn new(image: impl Into<PathBuf>, text: impl Into<String>, label: i64) -> Self {
        Self {
            image: image.into(),
            text:  text.into(),
            label,
        }
    }
}

/// Train and validation record lists produced by a `PairSource`.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplits {
    pub train: Vec<PairRecord>,
    pub val:   Vec<PairRecord>,
}

impl DatasetSplits {
    pub fn new(train: Vec<PairRecord>, val: Vec<PairRecord>) -> Self {
        Self { train, val }
    }

    /// Every caption in the training split, used to build a tokenizer
    pub fn train_texts(&self) -> Vec<String> {
        self.train.iter().map(|r| r.text.clone()).collect()
    }
}
