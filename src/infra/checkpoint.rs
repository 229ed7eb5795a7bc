// ============================================================
// Layer 6 — Checkpoint Store
// ============================================================
// Persists named weights as safetensors and the run configuration
// as JSON.
//
//   save_dir/
//     best_epoch_weights.safetensors  ← weights of the best epoch so far
//     train_config.json               ← every option of the run
//
// Weights are keyed by parameter name ("image.layers.0.norm1.gamma")
// so a checkpoint from a different architecture can still be loaded
// partially: see `partition_compatible`.
//
// Writes go to a temporary sibling first and are then renamed, so
// an interrupted save never leaves a truncated best checkpoint.

use anyhow::{bail, Context, Result};
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::state_dict::{StateDict, TensorEntry};

pub const BEST_WEIGHTS_FILE: &str = "best_epoch_weights.safetensors";
pub const CONFIG_FILE: &str = "train_config.json";

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_WEIGHTS_FILE)
    }

    /// Overwrite the best-epoch checkpoint with `weights`.
    pub fn save(&self, weights: &StateDict) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create save directory '{}'", self.dir.display()))?;

        let path = self.best_path();
        write_safetensors(&path, weights)?;

        tracing::debug!(
            "Saved {} tensors ({} parameters) to '{}'",
            weights.len(),
            weights.parameter_count(),
            path.display()
        );
        Ok(path)
    }

    /// Read every f32 tensor of a safetensors file.
    pub fn load(path: impl AsRef<Path>) -> Result<StateDict> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read checkpoint '{}'", path.display()))?;

        let tensors = SafeTensors::deserialize(&bytes)
            .with_context(|| format!("'{}' is not a valid safetensors file", path.display()))?;

        let mut dict = StateDict::new();
        for (name, view) in tensors.tensors() {
            if view.dtype() != Dtype::F32 {
                bail!(
                    "Tensor '{}' in '{}' has dtype {:?}; only F32 checkpoints are supported",
                    name,
                    path.display(),
                    view.dtype()
                );
            }
            let shape  = view.shape().to_vec();
            let values = bytemuck::pod_collect_to_vec::<u8, f32>(view.data());

            let entry = TensorEntry::new(shape, values);
            if entry.numel() != entry.values.len() {
                bail!("Tensor '{}' in '{}' has inconsistent shape", name, path.display());
            }
            dict.insert(name, entry);
        }

        tracing::debug!("Read {} tensors from '{}'", dict.len(), path.display());
        Ok(dict)
    }

    /// Save the training configuration to JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create save directory '{}'", self.dir.display()))?;

        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }
}

fn write_safetensors(path: &Path, weights: &StateDict) -> Result<()> {
    let encoded: Vec<(&String, Vec<u8>, &Vec<usize>)> = weights
        .iter()
        .map(|(name, entry)| {
            let bytes: Vec<u8> = bytemuck::cast_slice(&entry.values).to_vec();
            (name, bytes, &entry.shape)
        })
        .collect();

    let mut views = Vec::with_capacity(encoded.len());
    for (name, bytes, shape) in &encoded {
        let view = TensorView::new(Dtype::F32, shape.to_vec(), bytes)
            .with_context(|| format!("Tensor '{name}' does not match its shape {shape:?}"))?;
        views.push((name.as_str(), view));
    }

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "cli2p".to_string());

    let serialized = safetensors::serialize(views, &Some(metadata))
        .context("Cannot serialise checkpoint")?;

    let tmp = path.with_extension("safetensors.tmp");
    fs::write(&tmp, serialized)
        .with_context(|| format!("Cannot write checkpoint to '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Cannot move checkpoint into '{}'", path.display()))?;
    Ok(())
}
