// ============================================================
// Layer 6 — Loss History
// ============================================================
// Records one row per epoch and keeps the best checkpoint.
//
// Output file: save_dir/loss_history.csv
//
//   epoch,train_loss,val_loss,lr
//   1,4.153201,4.098813,0.00003
//   2,3.870044,3.912650,0.00003
//
// After each epoch the validation loss is compared with the best
// seen so far; on improvement the model's weights replace
// best_epoch_weights.safetensors. Processes other than rank 0 keep
// the bookkeeping in memory but never touch the disk.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use crate::infra::checkpoint::CheckpointStore;
use crate::ml::model::Cli2pModel;

pub const HISTORY_FILE: &str = "loss_history.csv";

/// One row of the loss history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch:      usize,
    pub train_loss: f64,
    pub val_loss:   f64,
    /// Learning rate the epoch ran with
    pub lr:         f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, lr: f64) -> Self {
        Self { epoch, train_loss, val_loss, lr }
    }

    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

pub struct LossHistory {
    csv_path:      PathBuf,
    store:         CheckpointStore,
    writer:        bool,
    rows:          Vec<EpochMetrics>,
    best_val_loss: f64,
}

impl LossHistory {
    /// Create the history for `dir`; only a writer creates the CSV.
    ///
    /// The CSV is truncated so each run starts a fresh history.
    pub fn new(dir: impl Into<PathBuf>, writer: bool) -> Result<Self> {
        let dir      = dir.into();
        let csv_path = dir.join(HISTORY_FILE);

        if writer {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Cannot create save directory '{}'", dir.display()))?;
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,train_loss,val_loss,lr")?;
            tracing::debug!("Created loss history: '{}'", csv_path.display());
        }

        Ok(Self {
            csv_path,
            store: CheckpointStore::new(dir),
            writer,
            rows: Vec::new(),
            best_val_loss: f64::INFINITY,
        })
    }

    /// Append an epoch and save the model if it is the best so far.
    ///
    /// Returns whether the epoch improved on the best validation loss.
    pub fn record_epoch<B: Backend>(&mut self, m: EpochMetrics, model: &Cli2pModel<B>) -> Result<bool> {
        let improved = m.is_improvement(self.best_val_loss);

        if self.writer {
            let mut f = OpenOptions::new()
                .append(true)
                .open(&self.csv_path)
                .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;
            writeln!(f, "{},{:.6},{:.6},{}", m.epoch, m.train_loss, m.val_loss, m.lr)?;

            if improved {
                let path = self.store.save(&model.state_dict()?)?;
                tracing::info!(
                    "val_loss improved {:.4} → {:.4}, saved '{}'",
                    self.best_val_loss,
                    m.val_loss,
                    path.display()
                );
            }
        }

        if improved {
            self.best_val_loss = m.val_loss;
        }
        self.rows.push(m);
        Ok(improved)
    }

    pub fn best_val_loss(&self) -> f64 {
        self.best_val_loss
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[EpochMetrics] {
        &self.rows
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
