// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches tensors, autodiff or a burn backend.
//
//   model.rs      CLI2P dual encoder: ViT-style image tower,
//                 transformer text tower, learned logit scale
//   state.rs      model ⇄ named StateDict, for checkpoints
//                 and partial warm starts
//   loss.rs       symmetric contrastive (InfoNCE) loss with
//                 label-aware positives
//   optimizer.rs  Adam / SGD factory behind one trait
//   scheduler.rs  StepLR / ReduceLROnPlateau, stepped per epoch
//   device.rs     single-process vs distributed placement
//   epoch.rs      one training pass plus one validation pass
//   trainer.rs    backend selection, setup and the epoch loop

pub mod model;

pub mod state;

pub mod loss;

pub mod optimizer;

pub mod scheduler;

pub mod device;

pub mod epoch;

/// Full training loop with validation and checkpointing
pub mod trainer;
