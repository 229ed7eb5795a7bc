// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full training run in order:
//
//   Step 1: Validate the configuration
//   Step 2: Resolve device and rank      (Layer 5 - ml)
//   Step 3: Load and split the pairs     (Layer 4 - data)
//   Step 4: Load or build tokenizer      (Layer 6 - infra)
//   Step 5: Build datasets               (Layer 4 - data)
//   Step 6: Save config                  (Layer 6 - infra)
//   Step 7: Run training loop            (Layer 5 - ml)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{dataset::SiameseDataset, loader::load_dataset};
use crate::infra::{
    checkpoint::{CheckpointStore, BEST_WEIGHTS_FILE},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    device::{accelerator_available, resolve_placement, DevicePreference},
    model::Cli2pConfig,
    optimizer::{OptimizerKind, OptimizerSettings},
    scheduler::ScheduleKind,
    trainer::{run_training, TrainingReport},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Every option of a run. Immutable once built; saved next to the
// weights so a run can be reproduced or inspected later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub dataset_path:   PathBuf,
    pub save_dir:       PathBuf,
    /// [height, width] fed to the image tower
    pub input_shape:    [usize; 2],
    pub batch_size:     usize,
    pub epochs:         usize,
    pub lr:             f64,
    pub momentum:       f64,
    pub weight_decay:   f64,
    pub optimizer:      OptimizerKind,
    pub lr_schedule:    ScheduleKind,
    /// 0 loads batches on the training thread
    pub num_workers:    usize,
    pub distributed:    bool,
    /// Warm-start from save_dir/best_epoch_weights.safetensors
    pub pretrained:     bool,
    pub device:         DevicePreference,
    pub seed:           u64,
    /// Used only when the dataset has no val.jsonl
    pub val_fraction:   f64,
    /// Random horizontal flips on the training split
    pub augment:        bool,
    pub context_length: usize,
    pub vocab_size:     usize,
    pub embed_dim:      usize,
    pub patch_size:     usize,
    pub vision_width:   usize,
    pub vision_layers:  usize,
    pub vision_heads:   usize,
    pub text_width:     usize,
    pub text_layers:    usize,
    pub text_heads:     usize,
    pub dropout:        f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset_path:   PathBuf::from("dataset"),
            save_dir:       PathBuf::from("model_weight"),
            input_shape:    [224, 224],
            batch_size:     2,
            epochs:         100,
            lr:             3e-5,
            momentum:       0.9,
            weight_decay:   0.0,
            optimizer:      OptimizerKind::Adam,
            lr_schedule:    ScheduleKind::ReduceLrOnPlateau,
            num_workers:    0,
            distributed:    false,
            pretrained:     true,
            device:         DevicePreference::Accelerator,
            seed:           42,
            val_fraction:   0.1,
            augment:        true,
            context_length: 52,
            vocab_size:     21128,
            embed_dim:      256,
            patch_size:     16,
            vision_width:   256,
            vision_layers:  4,
            vision_heads:   8,
            text_width:     256,
            text_layers:    4,
            text_heads:     8,
            dropout:        0.0,
        }
    }
}

impl TrainConfig {
    /// Reject option combinations no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(self.epochs > 0, "epochs must be at least 1");
        ensure!(self.lr > 0.0 && self.lr.is_finite(), "lr must be a positive number, got {}", self.lr);
        ensure!(
            self.val_fraction > 0.0 && self.val_fraction < 1.0,
            "val_fraction must lie strictly between 0 and 1, got {}",
            self.val_fraction
        );
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "dropout must lie in [0, 1), got {}",
            self.dropout
        );
        self.model_config().validate()
    }

    pub fn model_config(&self) -> Cli2pConfig {
        Cli2pConfig::new(
            self.embed_dim,
            self.input_shape[0],
            self.input_shape[1],
            self.patch_size,
            self.vision_width,
            self.vision_layers,
            self.vision_heads,
            self.vocab_size,
            self.context_length,
            self.text_width,
            self.text_layers,
            self.text_heads,
        )
        .with_dropout(self.dropout)
    }

    pub fn optimizer_settings(&self) -> OptimizerSettings {
        OptimizerSettings {
            momentum:     self.momentum,
            weight_decay: self.weight_decay,
        }
    }

    /// Where the best weights of this run live (and warm-start reads from)
    pub fn checkpoint_path(&self) -> PathBuf {
        self.save_dir.join(BEST_WEIGHTS_FILE)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingReport> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Placement ─────────────────────────────────────────────────
        let probe_accelerator = cfg.device == DevicePreference::Accelerator || cfg.distributed;
        let placement = resolve_placement(
            cfg.device,
            cfg.distributed,
            probe_accelerator && accelerator_available(),
            |key| std::env::var(key).ok(),
        )?;
        tracing::info!("Placement: {:?}", placement);

        // ── Step 3: Load pairs ────────────────────────────────────────────────
        tracing::info!("Loading pairs from '{}'", cfg.dataset_path.display());
        let splits = load_dataset(&cfg.dataset_path, cfg.val_fraction, cfg.seed)?;
        tracing::info!("Split: {} train, {} validation", splits.train.len(), splits.val.len());

        // ── Step 4: Tokenizer ─────────────────────────────────────────────────
        // Built from training captions only, then reused by later runs
        let tok_store = TokenizerStore::new(&cfg.save_dir);
        let tokenizer = tok_store.load_or_build(&splits.train_texts(), cfg.vocab_size)?;

        // ── Step 5: Datasets ──────────────────────────────────────────────────
        let train_dataset = SiameseDataset::new(
            cfg.input_shape,
            splits.train,
            &tokenizer,
            cfg.context_length,
            cfg.augment,
        )?;
        let val_dataset = SiameseDataset::new(
            cfg.input_shape,
            splits.val,
            &tokenizer,
            cfg.context_length,
            false,
        )?;

        // ── Step 6: Save config ───────────────────────────────────────────────
        if placement.group.is_writer() {
            CheckpointStore::new(&cfg.save_dir).save_config(cfg)?;
        }

        // ── Step 7: Train ─────────────────────────────────────────────────────
        run_training(cfg, train_dataset, val_dataset, placement)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::write_pairs;
    use crate::ml::model::tests::tiny_config;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let bad = [
            TrainConfig { batch_size: 0, ..TrainConfig::default() },
            TrainConfig { epochs: 0, ..TrainConfig::default() },
            TrainConfig { val_fraction: 1.0, ..TrainConfig::default() },
            TrainConfig { input_shape: [225, 224], ..TrainConfig::default() },
            TrainConfig { vision_heads: 3, ..TrainConfig::default() },
            TrainConfig { lr: 0.0, ..TrainConfig::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "accepted {cfg:?}");
        }
    }

    #[test]
    fn test_config_json_round_trip_keeps_kinds() {
        let cfg  = TrainConfig { optimizer: OptimizerKind::Sgd, ..TrainConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();

        assert!(json.contains("\"sgd\""));
        assert!(json.contains("\"reduce-lr-on-plateau\""));
        assert_eq!(serde_json::from_str::<TrainConfig>(&json).unwrap(), cfg);
    }

    #[test]
    fn test_execute_on_cpu_writes_outputs() {
        let dir  = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        let save = dir.path().join("model_weight");

        let records = write_pairs(&root, 4);
        let lines: String = records
            .iter()
            .map(|r| {
                let image = r.image.strip_prefix(&root).unwrap().display().to_string();
                format!("{}\n", serde_json::json!({ "image": image, "text": r.text, "label": r.label }))
            })
            .collect();
        fs::write(root.join("train.jsonl"), &lines).unwrap();
        fs::write(root.join("val.jsonl"), &lines).unwrap();

        let model = tiny_config();
        let cfg = TrainConfig {
            dataset_path:   root,
            save_dir:       save.clone(),
            input_shape:    [model.image_height, model.image_width],
            epochs:         2,
            device:         DevicePreference::Cpu,
            optimizer:      OptimizerKind::Sgd,
            lr_schedule:    ScheduleKind::StepLr,
            lr:             1e-3,
            augment:        false,
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

        let report = TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(report.epochs.len(), 2);

        for file in ["best_epoch_weights.safetensors", "loss_history.csv", "train_config.json", "tokenizer.json"] {
            assert!(save.join(file).exists(), "missing {file}");
        }
        assert_eq!(CheckpointStore::new(&save).load_config().unwrap(), cfg);

        let history = fs::read_to_string(save.join("loss_history.csv")).unwrap();
        assert_eq!(history.lines().count(), 3);
    }
}
