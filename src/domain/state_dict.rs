// ============================================================
// Layer 3 — Named Parameter Snapshot
// ============================================================
// A StateDict maps a dotted parameter name such as
//   text.layers.0.self_attn.query.weight
// to its shape and flattened f32 values.
//
// Checkpoints are read and written as StateDicts, and a partial
// reload compares the checkpoint against the freshly built model's
// own StateDict: an entry is restored only when BOTH the name and
// the shape match.

use std::collections::BTreeMap;

/// Shape plus row-major values of one parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorEntry {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorEntry {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// Number of scalars implied by the shape
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Ordered name → tensor mapping. BTreeMap keeps iteration (and
/// therefore file layout and reports) stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    entries: BTreeMap<String, TensorEntry>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TensorEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TensorEntry)> {
        self.entries.iter()
    }

    /// Total scalar count over all entries
    pub fn parameter_count(&self) -> usize {
        self.entries.values().map(TensorEntry::numel).sum()
    }
}

impl FromIterator<(String, TensorEntry)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, TensorEntry)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// Outcome of matching a checkpoint against a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Names restored from the checkpoint (name and shape matched)
    pub loaded: Vec<String>,

    /// Checkpoint names that were not restored: unknown to the
    /// model, or known with a different shape
    pub unmatched: Vec<String>,

    /// Model names left at their fresh initialisation
    pub missing: Vec<String>,
}

impl LoadReport {
    /// True when a checkpoint was offered but nothing could be used,
    /// including a checkpoint with no tensors at all
    pub fn is_total_mismatch(&self) -> bool {
        self.loaded.is_empty()
    }
}

/// Split `checkpoint` into the entries `model` can accept and a report.
///
/// `missing` always equals the model's key set minus `loaded`.
pub fn partition_compatible(model: &StateDict, checkpoint: StateDict) -> (StateDict, LoadReport) {
    let mut report  = LoadReport::default();
    let mut matched = StateDict::new();

    for (name, entry) in checkpoint.entries {
        match model.get(&name) {
            Some(current) if current.shape == entry.shape => {
                report.loaded.push(name.clone());
                matched.insert(name, entry);
            }
            _ => report.unmatched.push(name),
        }
    }

    report.missing = model
        .keys()
        .filter(|name| !matched.contains(name))
        .cloned()
        .collect();

    (matched, report)
}
