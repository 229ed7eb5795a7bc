//! Epoch-level learning-rate schedules
//!
//! Both schedules are stepped once per epoch with that epoch's
//! validation loss and return the learning rate for the next epoch:
//! - `StepLr` - multiply by `gamma` every `step_size` epochs; ignores the loss
//! - `ReduceLrOnPlateau` - multiply by `factor` after `patience` epochs
//!   without a relative improvement of `threshold`

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleKind {
    StepLr,
    ReduceLrOnPlateau,
}

/// Learning-rate policy driven by the latest validation loss.
pub trait LrSchedule {
    fn kind(&self) -> ScheduleKind;

    /// Learning rate to use for the current epoch
    fn current_lr(&self) -> f64;

    /// Consume the epoch's validation loss; returns the updated rate
    fn step(&mut self, val_loss: f64) -> f64;
}

/// Build the schedule selected by `kind`, starting from `initial_lr`.
pub fn build_schedule(kind: ScheduleKind, initial_lr: f64) -> Box<dyn LrSchedule> {
    tracing::info!("LR schedule: {:?} (initial lr={})", kind, initial_lr);
    match kind {
        ScheduleKind::StepLr            => Box::new(StepLr::new(initial_lr, 6, 0.9)),
        ScheduleKind::ReduceLrOnPlateau => Box::new(ReduceLrOnPlateau::new(initial_lr, 0.9, 3)),
    }
}

/// Decay by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr:   f64,
    step_size: usize,
    gamma:     f64,
    epochs:    usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            epochs: 0,
        }
    }
}

impl LrSchedule for StepLr {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::StepLr
    }

    fn current_lr(&self) -> f64 {
        self.base_lr * self.gamma.powi((self.epochs / self.step_size) as i32)
    }

    fn step(&mut self, _val_loss: f64) -> f64 {
        self.epochs += 1;
        self.current_lr()
    }
}

/// Shrink the rate when the monitored loss stops improving.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    lr:         f64,
    factor:     f64,
    patience:   usize,
    /// Relative improvement required to reset patience
    threshold:  f64,
    cooldown:   usize,
    min_lr:     f64,
    /// Reductions smaller than this are skipped
    eps:        f64,
    best:       f64,
    bad_epochs: usize,
    cooldown_counter: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            lr,
            factor,
            patience,
            threshold: 1e-4,
            cooldown:  0,
            min_lr:    0.0,
            eps:       1e-10,
            best:      f64::INFINITY,
            bad_epochs: 0,
            cooldown_counter: 0,
        }
    }

    #[cfg(test)]
    pub fn with_cooldown(mut self, cooldown: usize) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[cfg(test)]
    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    fn is_better(&self, loss: f64) -> bool {
        // NaN compares false, so a diverged epoch counts as a bad one
        loss < self.best * (1.0 - self.threshold)
    }
}

impl LrSchedule for ReduceLrOnPlateau {
    fn kind(&self) -> ScheduleKind {
        ScheduleKind::ReduceLrOnPlateau
    }

    fn current_lr(&self) -> f64 {
        self.lr
    }

    fn step(&mut self, val_loss: f64) -> f64 {
        if self.is_better(val_loss) {
            self.best       = val_loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.bad_epochs = 0;
        }

        if self.bad_epochs > self.patience {
            let reduced = (self.lr * self.factor).max(self.min_lr);
            if self.lr - reduced > self.eps {
                tracing::info!("Reducing learning rate {:.3e} → {:.3e}", self.lr, reduced);
                self.lr = reduced;
            }
            self.cooldown_counter = self.cooldown;
            self.bad_epochs       = 0;
        }

        self.lr
    }
}
