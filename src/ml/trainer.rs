// ============================================================
// Layer 5 — Training Driver
// ============================================================
// Setup, then the epoch loop:
//
//   1. Loaders: training reshuffles every epoch from cfg.seed and
//      may use worker threads; validation is serial, in dataset
//      order
//   2. Model from Cli2pConfig, optionally warm-started from the
//      best checkpoint in save_dir (name + shape matching only)
//   3. Contrastive loss, optimizer, LR schedule, loss history
//   4. For each epoch: fit_one_epoch, then schedule.step(val_loss)
//
// The backend is picked once at the boundary (run_training);
// everything below is generic over AutodiffBackend:
//   accelerator → Autodiff<Wgpu>
//   cpu         → Autodiff<NdArray>

use anyhow::{ensure, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::Path;

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::PairBatcher, dataset::SiameseDataset};
use crate::domain::state_dict::{partition_compatible, LoadReport};
use crate::infra::{checkpoint::CheckpointStore, metrics::LossHistory};
use crate::ml::{
    device::{ComputeTarget, Placement, ProcessGroup},
    epoch::{fit_one_epoch, EpochContext, EpochLoaders, EpochSummary},
    loss::ContrastiveLoss,
    model::Cli2pModel,
    optimizer::build_optimizer,
    scheduler::build_schedule,
};

type GpuBackend = Autodiff<Wgpu>;
type CpuBackend = Autodiff<NdArray>;

/// What a finished run did, epoch by epoch.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs:          Vec<EpochSummary>,
    pub load_report:     LoadReport,
    /// Validation losses handed to the LR schedule, in order
    pub schedule_inputs: Vec<f64>,
    pub final_lr:        f64,
    pub best_val_loss:   f64,
}

pub fn run_training(
    cfg:           &TrainConfig,
    train_dataset: SiameseDataset,
    val_dataset:   SiameseDataset,
    placement:     Placement,
) -> Result<TrainingReport> {
    match placement.target {
        ComputeTarget::Accelerator(index) => {
            let device = if placement.group.is_distributed() {
                WgpuDevice::DiscreteGpu(index)
            } else {
                WgpuDevice::default()
            };
            tracing::info!("Using WGPU device: {:?}", device);
            train_loop::<GpuBackend>(cfg, train_dataset, val_dataset, placement.group, device)
        }
        ComputeTarget::Cpu => {
            let device = NdArrayDevice::Cpu;
            tracing::info!("Using NdArray device: {:?}", device);
            train_loop::<CpuBackend>(cfg, train_dataset, val_dataset, placement.group, device)
        }
    }
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    train_dataset: SiameseDataset,
    val_dataset:   SiameseDataset,
    group:         ProcessGroup,
    device:        B::Device,
) -> Result<TrainingReport> {
    B::seed(cfg.seed);

    // ── Steps per epoch ───────────────────────────────────────────────────────
    // The partial last batch is dropped, as len / batch_size implies
    let train_steps = train_dataset.len() / cfg.batch_size;
    let val_steps   = val_dataset.len() / cfg.batch_size;
    ensure!(
        train_steps > 0,
        "Dataset too small for batch size: {} training pairs, batch size {}",
        train_dataset.len(),
        cfg.batch_size
    );
    ensure!(
        val_steps > 0,
        "Dataset too small for batch size: {} validation pairs, batch size {}",
        val_dataset.len(),
        cfg.batch_size
    );

    // ── Data loaders ──────────────────────────────────────────────────────────
    let loaders = build_loaders::<B>(cfg, train_dataset, val_dataset, &device);

    // ── Model ─────────────────────────────────────────────────────────────────
    let model_cfg = cfg.model_config();
    model_cfg.validate()?;
    let model: Cli2pModel<B> = model_cfg.init(&device);

    let weights = cfg.checkpoint_path();
    let (mut model, load_report) = warm_start(model, cfg.pretrained, &weights)?;
    tracing::info!(
        "Model ready: vision {}x{}, text {}x{}, embed_dim={}",
        cfg.vision_layers, cfg.vision_width, cfg.text_layers, cfg.text_width, cfg.embed_dim
    );

    // ── Loss, optimizer, schedule, history ────────────────────────────────────
    let loss_fn      = ContrastiveLoss::new();
    let mut optim    = build_optimizer::<B, Cli2pModel<B>>(cfg.optimizer, cfg.optimizer_settings());
    let mut schedule = build_schedule(cfg.lr_schedule, cfg.lr);
    let mut history  = LossHistory::new(&cfg.save_dir, group.is_writer())?;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut epochs          = Vec::with_capacity(cfg.epochs);
    let mut schedule_inputs = Vec::with_capacity(cfg.epochs);

    for epoch in 1..=cfg.epochs {
        let ctx = EpochContext {
            epoch,
            epoch_count: cfg.epochs,
            train_steps,
            val_steps,
            lr: schedule.current_lr(),
        };

        let (next, summary) = fit_one_epoch(
            model,
            &loaders,
            &loss_fn,
            optim.as_mut(),
            &mut history,
            ctx,
        )?;
        model = next;

        schedule.step(summary.val_loss);
        schedule_inputs.push(summary.val_loss);
        epochs.push(summary);
    }

    tracing::info!("Training complete! best val_loss={:.4}", history.best_val_loss());
    Ok(TrainingReport {
        epochs,
        load_report,
        schedule_inputs,
        final_lr: schedule.current_lr(),
        best_val_loss: history.best_val_loss(),
    })
}

/// Build the training and validation loaders for `device`.
///
/// Only the training loader gets `num_workers` threads. burn's
/// multi-threaded loader yields batches in completion order, which
/// would make validation order differ between runs.
pub fn build_loaders<B: AutodiffBackend>(
    cfg:           &TrainConfig,
    train_dataset: SiameseDataset,
    val_dataset:   SiameseDataset,
    device:        &B::Device,
) -> EpochLoaders<B> {
    let train_errors = train_dataset.errors();
    let val_errors   = val_dataset.errors();

    let mut train_builder = DataLoaderBuilder::new(PairBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed);
    if cfg.num_workers > 0 {
        train_builder = train_builder.num_workers(cfg.num_workers);
    }
    let val_builder = DataLoaderBuilder::new(PairBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size);

    EpochLoaders {
        train: train_builder.build(train_dataset),
        val:   val_builder.build(val_dataset),
        train_errors,
        val_errors,
    }
}

/// Restore every checkpoint tensor whose name and shape fit `model`.
///
/// Nothing is read when `pretrained` is off or the file does not exist.
pub fn warm_start<B: Backend>(
    model:      Cli2pModel<B>,
    pretrained: bool,
    path:       &Path,
) -> Result<(Cli2pModel<B>, LoadReport)> {
    if !pretrained {
        return Ok((model, LoadReport::default()));
    }
    if !path.exists() {
        tracing::info!("No checkpoint at '{}', starting from scratch", path.display());
        return Ok((model, LoadReport::default()));
    }

    let checkpoint = CheckpointStore::load(path)?;
    if checkpoint.is_empty() {
        tracing::warn!("Checkpoint '{}' holds no tensors", path.display());
    }
    let (matched, report) = partition_compatible(&model.state_dict()?, checkpoint);

    for name in &report.unmatched {
        tracing::warn!("Skipped checkpoint key '{}': unknown or shape mismatch", name);
    }
    if report.is_total_mismatch() {
        tracing::warn!(
            "No parameters from '{}' fit this model ({} keys skipped); training from scratch",
            path.display(),
            report.unmatched.len()
        );
    } else {
        for name in &report.missing {
            tracing::warn!("Model key '{}' not in checkpoint, left fresh", name);
        }
        tracing::info!(
            "Loaded {} tensors from '{}' ({} skipped, {} left fresh)",
            report.loaded.len(),
            path.display(),
            report.unmatched.len(),
            report.missing.len()
        );
    }

    Ok((model.load_state_dict(&matched), report))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::{truncate_image, write_pairs};
    use crate::infra::checkpoint::BEST_WEIGHTS_FILE;
    use crate::infra::tokenizer_store::TokenizerStore;
    use crate::ml::model::tests::tiny_config;
    use std::fs;

    /// A config that trains the tiny model on 8x8 images.
    fn tiny_train_config(save_dir: &Path) -> TrainConfig {
        let model = tiny_config();
        TrainConfig {
            save_dir:       save_dir.to_path_buf(),
            input_shape:    [model.image_height, model.image_width],
            batch_size:     2,
            epochs:         1,
            lr:             1e-3,
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
            augment:        false,
            ..TrainConfig::default()
        }
    }

    fn datasets(dir: &Path, cfg: &TrainConfig) -> (SiameseDataset, SiameseDataset) {
        let records = write_pairs(dir, 4);
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let tokenizer = TokenizerStore::new(dir.join("tok"))
            .load_or_build(&texts, cfg.vocab_size)
            .unwrap();

        let train = SiameseDataset::new(cfg.input_shape, records.clone(), &tokenizer, cfg.context_length, false).unwrap();
        let val   = SiameseDataset::new(cfg.input_shape, records, &tokenizer, cfg.context_length, false).unwrap();
        (train, val)
    }

    #[test]
    fn test_single_epoch_end_to_end() {
        let dir  = tempfile::tempdir().unwrap();
        let save = dir.path().join("model_weight");
        let cfg  = tiny_train_config(&save);
        let (train, val) = datasets(dir.path(), &cfg);

        let report = train_loop::<CpuBackend>(&cfg, train, val, ProcessGroup::single(), NdArrayDevice::Cpu)
            .unwrap();

        assert_eq!(report.epochs.len(), 1);
        assert_eq!(report.epochs[0].train_batches, 2);
        assert_eq!(report.epochs[0].val_batches, 2);
        assert!(report.epochs[0].improved);
        assert_eq!(report.schedule_inputs.len(), 1);
        assert!(report.schedule_inputs[0].is_finite());

        let weights: Vec<_> = fs::read_dir(&save)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "safetensors"))
            .collect();
        assert_eq!(weights.len(), 1);
        assert!(save.join("loss_history.csv").exists());
    }

    #[test]
    fn test_partial_batch_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = tiny_train_config(&dir.path().join("out"));
        cfg.batch_size = 3;
        let (train, val) = datasets(dir.path(), &cfg);

        let report = train_loop::<CpuBackend>(&cfg, train, val, ProcessGroup::single(), NdArrayDevice::Cpu)
            .unwrap();
        assert_eq!(report.epochs[0].train_batches, 1);
        assert_eq!(report.epochs[0].val_batches, 1);
    }

    #[test]
    fn test_batch_larger_than_dataset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = tiny_train_config(&dir.path().join("out"));
        cfg.batch_size = 8;
        let (train, val) = datasets(dir.path(), &cfg);

        let err = train_loop::<CpuBackend>(&cfg, train, val, ProcessGroup::single(), NdArrayDevice::Cpu)
            .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn test_non_writer_saves_nothing() {
        let dir  = tempfile::tempdir().unwrap();
        let save = dir.path().join("rank1");
        let cfg  = tiny_train_config(&save);
        let (train, val) = datasets(dir.path(), &cfg);

        let group = ProcessGroup { rank: 1, local_rank: 1, world_size: 2 };
        train_loop::<CpuBackend>(&cfg, train, val, group, NdArrayDevice::Cpu).unwrap();
        assert!(!save.exists());
    }

    #[test]
    fn test_warm_start_skips_corrupt_file_when_not_pretrained() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join(BEST_WEIGHTS_FILE);
        fs::write(&path, b"corrupt").unwrap();

        let model = tiny_config().init::<NdArray>(&Default::default());
        let (_, report) = warm_start(model, false, &path).unwrap();
        assert_eq!(report, LoadReport::default());

        let model = tiny_config().init::<NdArray>(&Default::default());
        assert!(warm_start(model, true, &path).is_err());
    }

    #[test]
    fn test_warm_start_restores_saved_weights() {
        let dir   = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let source = tiny_config().init::<NdArray>(&Default::default());
        let saved  = source.state_dict().unwrap();
        let path   = store.save(&saved).unwrap();

        let fresh = tiny_config().init::<NdArray>(&Default::default());
        let (restored, report) = warm_start(fresh, true, &path).unwrap();

        assert_eq!(report.loaded.len(), saved.len());
        assert!(report.unmatched.is_empty());
        assert!(report.missing.is_empty());
        assert_eq!(restored.state_dict().unwrap(), saved);
    }

    #[test]
    fn test_warm_start_with_foreign_architecture_loads_nothing() {
        let dir   = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut wide = tiny_config();
        wide.embed_dim    = 16;
        wide.vision_width = 16;
        wide.text_width   = 16;
        let other = wide.init::<NdArray>(&Default::default());
        let path  = store.save(&other.state_dict().unwrap()).unwrap();

        let model = tiny_config().init::<NdArray>(&Default::default());
        let own   = model.state_dict().unwrap();
        let (_, report) = warm_start(model, true, &path).unwrap();

        // Only shape-independent scalars survive an architecture change
        assert!(report.loaded.iter().all(|k| k == "logit_scale"));
        assert_eq!(report.loaded.len() + report.missing.len(), own.len());
    }

    #[test]
    fn test_validation_order_is_stable_with_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = tiny_train_config(&dir.path().join("out"));
        cfg.num_workers = 2;

        let records = write_pairs(dir.path(), 5);
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let tokenizer = TokenizerStore::new(dir.path().join("tok"))
            .load_or_build(&texts, cfg.vocab_size)
            .unwrap();

        let val_steps = records.len() / cfg.batch_size;
        let first_batches = || -> Vec<Vec<i64>> {
            let train = SiameseDataset::new(cfg.input_shape, records.clone(), &tokenizer, cfg.context_length, false).unwrap();
            let val   = SiameseDataset::new(cfg.input_shape, records.clone(), &tokenizer, cfg.context_length, false).unwrap();
            let loaders = build_loaders::<CpuBackend>(&cfg, train, val, &NdArrayDevice::Cpu);
            loaders
                .val
                .iter()
                .take(val_steps)
                .map(|b| b.labels.into_data().convert::<i64>().to_vec::<i64>().unwrap())
                .collect()
        };

        let expected = vec![vec![0, 1], vec![2, 3]];
        for _ in 0..10 {
            assert_eq!(first_batches(), expected);
        }
    }

    #[test]
    fn test_image_lost_mid_run_fails_the_epoch() {
        let dir  = tempfile::tempdir().unwrap();
        let save = dir.path().join("model_weight");
        let cfg  = tiny_train_config(&save);
        let (train, val) = datasets(dir.path(), &cfg);

        // Both splits share the same files; the first pass to reach
        // image 3 hits the truncated file
        truncate_image(&dir.path().join("images").join("3.png"));

        let err = train_loop::<CpuBackend>(&cfg, train, val, ProcessGroup::single(), NdArrayDevice::Cpu)
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("failed to load"), "{message}");
        assert!(message.contains("3.png"), "{message}");
        assert!(!save.join(BEST_WEIGHTS_FILE).exists());
    }
}
