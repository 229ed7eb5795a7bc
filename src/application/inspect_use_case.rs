// ============================================================
// Layer 2 — Inspect Use Case
// ============================================================
// Reads a weights file and reports what is inside: parameter
// names, shapes and the total parameter count. When the file
// sits next to a train_config.json, the report also says how
// many of its tensors a model built from that config would load.

use anyhow::Result;
use burn::backend::NdArray;
use std::path::{Path, PathBuf};

use crate::domain::state_dict::{partition_compatible, LoadReport, StateDict};
use crate::infra::checkpoint::{CheckpointStore, CONFIG_FILE};

#[derive(Debug, Clone, PartialEq)]
pub struct TensorSummary {
    pub name:  String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub tensors:          Vec<TensorSummary>,
    pub parameter_count:  usize,
    /// Present when a train_config.json was found beside the weights
    pub config_fit:       Option<LoadReport>,
}

pub struct InspectUseCase {
    checkpoint: PathBuf,
}

impl InspectUseCase {
    pub fn new(checkpoint: impl Into<PathBuf>) -> Self {
        Self { checkpoint: checkpoint.into() }
    }

    pub fn execute(&self) -> Result<CheckpointSummary> {
        let weights = CheckpointStore::load(&self.checkpoint)?;

        let tensors = weights
            .iter()
            .map(|(name, entry)| TensorSummary {
                name:  name.clone(),
                shape: entry.shape.clone(),
            })
            .collect();

        Ok(CheckpointSummary {
            tensors,
            parameter_count: weights.parameter_count(),
            config_fit:      self.config_fit(&weights)?,
        })
    }

    fn config_fit(&self, weights: &StateDict) -> Result<Option<LoadReport>> {
        let dir = self.checkpoint.parent().unwrap_or(Path::new("."));
        if !dir.join(CONFIG_FILE).is_file() {
            return Ok(None);
        }

        let cfg   = CheckpointStore::new(dir).load_config()?;
        let model = cfg.model_config().init::<NdArray>(&Default::default());
        let (_, report) = partition_compatible(&model.state_dict()?, weights.clone());
        Ok(Some(report))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::domain::state_dict::TensorEntry;
    use crate::ml::model::tests::tiny_config;

    #[test]
    fn test_lists_names_and_shapes() {
        let dir   = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut dict = StateDict::new();
        dict.insert("a.weight", TensorEntry::new(vec![2, 3], vec![0.0; 6]));
        dict.insert("logit_scale", TensorEntry::new(vec![1], vec![1.0]));
        let path = store.save(&dict).unwrap();

        let summary = InspectUseCase::new(path).execute().unwrap();
        assert_eq!(summary.parameter_count, 7);
        assert_eq!(summary.tensors[0], TensorSummary { name: "a.weight".into(), shape: vec![2, 3] });
        assert!(summary.config_fit.is_none());
    }

    #[test]
    fn test_reports_fit_against_saved_config() {
        let dir   = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let model = tiny_config();

        let cfg = TrainConfig {
            input_shape:    [model.image_height, model.image_width],
            context_length: model.context_length,
            vocab_size:     model.vocab_size,
            embed_dim:      model.embed_dim,
            patch_size:     model.patch_size,
            vision_width:   model.vision_width,
            vision_layers:  model.vision_layers,
            vision_heads:   model.vision_heads,
            text_width:     model.text_width,
            text_layers:    model.text_layers,
            text_heads:     model.text_heads,
            ..TrainConfig::default()
        };
        store.save_config(&cfg).unwrap();

        let weights = model.init::<NdArray>(&Default::default()).state_dict().unwrap();
        let path    = store.save(&weights).unwrap();

        let fit = InspectUseCase::new(path).execute().unwrap().config_fit.unwrap();
        assert_eq!(fit.loaded.len(), weights.len());
        assert!(fit.unmatched.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(InspectUseCase::new("/nonexistent/best.safetensors").execute().is_err());
    }
}
