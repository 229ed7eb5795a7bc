// ============================================================
// Layer 5 — Optimizer Factory
// ============================================================
// The optimizer is chosen by an explicit OptimizerKind; there is
// no fallback kind. Both kinds sit behind one object-safe trait so
// the training loop holds a single `Box<dyn ModelOptimizer<M>>`.
//
//   Adam: betas (momentum, 0.999)
//   SGD:  Nesterov momentum, no dampening
//
// Weight decay of 0 disables the decay term entirely.

use std::marker::PhantomData;

use burn::{
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, GradientsParams,
        Optimizer, SgdConfig,
    },
    tensor::backend::AutodiffBackend,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Hyperparameters shared by both optimizer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub momentum:     f64,
    pub weight_decay: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            momentum:     0.9,
            weight_decay: 0.0,
        }
    }
}

impl OptimizerSettings {
    fn weight_decay_config(&self) -> Option<WeightDecayConfig> {
        (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay as f32))
    }
}

/// One optimisation step over a whole module, independent of kind.
pub trait ModelOptimizer<M> {
    fn kind(&self) -> OptimizerKind;

    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

/// Binds a burn optimizer to its backend so it can be boxed.
struct BoundOptimizer<O, B> {
    kind:     OptimizerKind,
    inner:    O,
    _backend: PhantomData<B>,
}

impl<M, B, O> ModelOptimizer<M> for BoundOptimizer<O, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn kind(&self) -> OptimizerKind {
        self.kind
    }

    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        self.inner.step(lr, module, grads)
    }
}

/// Build the optimizer selected by `kind`.
pub fn build_optimizer<B, M>(kind: OptimizerKind, settings: OptimizerSettings) -> Box<dyn ModelOptimizer<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
{
    tracing::info!(
        "Optimizer: {:?} (momentum={}, weight_decay={})",
        kind,
        settings.momentum,
        settings.weight_decay
    );

    match kind {
        OptimizerKind::Adam => {
            let inner = AdamConfig::new()
                .with_beta_1(settings.momentum as f32)
                .with_beta_2(0.999)
                .with_weight_decay(settings.weight_decay_config())
                .init::<B, M>();
            Box::new(BoundOptimizer { kind, inner, _backend: PhantomData::<B> })
        }
        OptimizerKind::Sgd => {
            let momentum = MomentumConfig::new()
                .with_momentum(settings.momentum)
                .with_dampening(0.0)
                .with_nesterov(true);
            let inner = SgdConfig::new()
                .with_momentum(Some(momentum))
                .with_weight_decay(settings.weight_decay_config())
                .init::<B, M>();
            Box::new(BoundOptimizer { kind, inner, _backend: PhantomData::<B> })
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::{tests::tiny_config, Cli2pModel};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_kind_selects_exactly_that_optimizer() {
        for kind in [OptimizerKind::Adam, OptimizerKind::Sgd] {
            let optim = build_optimizer::<TestBackend, Cli2pModel<TestBackend>>(
                kind,
                OptimizerSettings::default(),
            );
            assert_eq!(optim.kind(), kind);
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(serde_json::from_str::<OptimizerKind>("\"rmsprop\"").is_err());
        assert!(OptimizerKind::from_str("rmsprop", true).is_err());
        assert_eq!(
            serde_json::from_str::<OptimizerKind>("\"sgd\"").unwrap(),
            OptimizerKind::Sgd
        );
    }

    #[test]
    fn test_step_changes_parameters() {
        use burn::prelude::*;

        let device = Default::default();
        let model: Cli2pModel<TestBackend> = tiny_config().init(&device);
        let before = model.state_dict().unwrap();

        let mut optim = build_optimizer::<TestBackend, Cli2pModel<TestBackend>>(
            OptimizerKind::Sgd,
            OptimizerSettings::default(),
        );

        let loss  = model.logit_scale.val().sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = optim.step(0.1, model, grads);

        let after = model.state_dict().unwrap();
        assert_ne!(before.get("logit_scale"), after.get("logit_scale"));
        assert_eq!(
            before.get("text.projection.weight"),
            after.get("text.projection.weight")
        );
    }
}
