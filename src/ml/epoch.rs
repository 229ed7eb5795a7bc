// ============================================================
// Layer 5 — One Epoch
// ============================================================
// Runs exactly one training pass and one validation pass:
//
//   train:  `train_steps` batches, forward → loss →
//           backward → optimiser step at the epoch's lr
//   valid:  `val_steps` batches on model.valid()
//           (InnerBackend, no autodiff graph, dropout off)
//
// The step counts are len / batch_size, so the partial last
// batch a loader may yield is never consumed. A pass that comes
// up short, or whose dataset recorded a load error, fails the
// epoch before anything is recorded. Average losses are handed
// to the LossHistory, which saves the checkpoint when
// validation improves.

use anyhow::{ensure, Result};
use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

use crate::data::{batcher::PairBatch, dataset::LoadErrors};
use crate::infra::metrics::{EpochMetrics, LossHistory};
use crate::ml::{loss::ContrastiveLoss, model::Cli2pModel, optimizer::ModelOptimizer};

/// Where an epoch sits in the run and how much of each loader it uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochContext {
    /// 1-based
    pub epoch:       usize,
    pub epoch_count: usize,
    pub train_steps: usize,
    pub val_steps:   usize,
    pub lr:          f64,
}

/// Both loaders of a run plus the load-error records of their datasets.
pub struct EpochLoaders<B: AutodiffBackend> {
    pub train:        Arc<dyn DataLoader<PairBatch<B>>>,
    pub val:          Arc<dyn DataLoader<PairBatch<B::InnerBackend>>>,
    pub train_errors: LoadErrors,
    pub val_errors:   LoadErrors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch:         usize,
    pub train_loss:    f64,
    pub val_loss:      f64,
    pub train_batches: usize,
    pub val_batches:   usize,
    pub lr:            f64,
    /// Whether this epoch produced a new best checkpoint
    pub improved:      bool,
}

fn mean(sum: f64, count: usize) -> f64 {
    if count > 0 { sum / count as f64 } else { f64::NAN }
}

/// Train then validate once; returns the updated model.
pub fn fit_one_epoch<B: AutodiffBackend>(
    mut model:    Cli2pModel<B>,
    loaders:      &EpochLoaders<B>,
    loss_fn:      &ContrastiveLoss,
    optimizer:    &mut dyn ModelOptimizer<Cli2pModel<B>>,
    history:      &mut LossHistory,
    ctx:          EpochContext,
) -> Result<(Cli2pModel<B>, EpochSummary)> {
    ensure!(ctx.train_steps > 0, "Epoch {} has no training steps", ctx.epoch);

    // ── Training phase ────────────────────────────────────────────────────────
    let mut train_loss_sum = 0.0f64;
    let mut train_batches  = 0usize;

    for batch in loaders.train.iter().take(ctx.train_steps) {
        let output = model.forward(batch.images, batch.input_ids, batch.attention_mask);
        let loss   = loss_fn.forward(output, batch.labels);

        train_loss_sum += loss.clone().into_scalar().elem::<f64>();
        train_batches  += 1;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(ctx.lr, model, grads);

        tracing::debug!(
            "epoch {} step {}/{} loss={:.4}",
            ctx.epoch,
            train_batches,
            ctx.train_steps,
            train_loss_sum / train_batches as f64
        );
    }
    loaders.train_errors.check("training")?;
    ensure!(
        train_batches == ctx.train_steps,
        "Epoch {}: training pass ended after {} of {} batches",
        ctx.epoch,
        train_batches,
        ctx.train_steps
    );

    // ── Validation phase ──────────────────────────────────────────────────────
    let model_valid = model.valid();

    let mut val_loss_sum = 0.0f64;
    let mut val_batches  = 0usize;

    for batch in loaders.val.iter().take(ctx.val_steps) {
        let output = model_valid.forward(batch.images, batch.input_ids, batch.attention_mask);
        val_loss_sum += loss_fn.forward(output, batch.labels).into_scalar().elem::<f64>();
        val_batches  += 1;
    }
    loaders.val_errors.check("validation")?;
    ensure!(
        val_batches == ctx.val_steps,
        "Epoch {}: validation pass ended after {} of {} batches",
        ctx.epoch,
        val_batches,
        ctx.val_steps
    );

    let train_loss = mean(train_loss_sum, train_batches);
    let val_loss   = mean(val_loss_sum, val_batches);

    println!(
        "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | lr={:.3e}",
        ctx.epoch, ctx.epoch_count, train_loss, val_loss, ctx.lr,
    );

    let improved = history.record_epoch(
        EpochMetrics::new(ctx.epoch, train_loss, val_loss, ctx.lr),
        &model,
    )?;

    Ok((
        model,
        EpochSummary {
            epoch: ctx.epoch,
            train_loss,
            val_loss,
            train_batches,
            val_batches,
            lr: ctx.lr,
            improved,
        },
    ))
}
