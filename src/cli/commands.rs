// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `inspect`, and all
// their flags. Enumerated options (optimizer, schedule, device)
// are parsed by clap's ValueEnum, so an unknown key is a usage
// error rather than a silent default.

use clap::{ArgAction, Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_use_case::TrainConfig;
use crate::ml::{device::DevicePreference, optimizer::OptimizerKind, scheduler::ScheduleKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the dual encoder on an image–text dataset
    Train(TrainArgs),

    /// List the tensors stored in a weights file
    Inspect(InspectArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset root holding train.jsonl (and optionally val.jsonl)
    #[arg(long, default_value = "dataset")]
    pub dataset_path: PathBuf,

    /// Directory for weights, loss history, config and tokenizer
    #[arg(long, default_value = "model_weight")]
    pub save_dir: PathBuf,

    /// Image tower input size
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"], default_values_t = [224, 224])]
    pub input_shape: Vec<usize>,

    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = 3e-5)]
    pub lr: f64,

    /// Adam beta1, or SGD Nesterov momentum
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// 0 disables weight decay
    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    #[arg(long, value_enum, default_value_t = ScheduleKind::ReduceLrOnPlateau)]
    pub lr_schedule: ScheduleKind,

    /// Batch-loading threads; 0 loads on the training thread
    #[arg(long, default_value_t = 0)]
    pub num_workers: usize,

    /// One process per accelerator, ranks taken from RANK / LOCAL_RANK
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub distributed: bool,

    /// Warm-start from <save-dir>/best_epoch_weights.safetensors if present
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub pretrained: bool,

    #[arg(long, value_enum, default_value_t = DevicePreference::Accelerator)]
    pub device: DevicePreference,

    /// Seed for shuffling, the validation split and initialisation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Held-out share of train.jsonl when there is no val.jsonl
    #[arg(long, default_value_t = 0.1)]
    pub val_fraction: f64,

    /// Random horizontal flips on training images
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub augment: bool,

    /// Tokens per caption, including [CLS] and [SEP]
    #[arg(long, default_value_t = 52)]
    pub context_length: usize,

    #[arg(long, default_value_t = 21128)]
    pub vocab_size: usize,

    /// Size of the shared embedding space
    #[arg(long, default_value_t = 256)]
    pub embed_dim: usize,

    #[arg(long, default_value_t = 16)]
    pub patch_size: usize,

    #[arg(long, default_value_t = 256)]
    pub vision_width: usize,

    #[arg(long, default_value_t = 4)]
    pub vision_layers: usize,

    /// vision_width must be divisible by vision_heads
    #[arg(long, default_value_t = 8)]
    pub vision_heads: usize,

    #[arg(long, default_value_t = 256)]
    pub text_width: usize,

    #[arg(long, default_value_t = 4)]
    pub text_layers: usize,

    /// text_width must be divisible by text_heads
    #[arg(long, default_value_t = 8)]
    pub text_heads: usize,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            dataset_path:   a.dataset_path,
            save_dir:       a.save_dir,
            // clap enforces exactly two values
            input_shape:    [a.input_shape[0], a.input_shape[1]],
            batch_size:     a.batch_size,
            epochs:         a.epochs,
            lr:             a.lr,
            momentum:       a.momentum,
            weight_decay:   a.weight_decay,
            optimizer:      a.optimizer,
            lr_schedule:    a.lr_schedule,
            num_workers:    a.num_workers,
            distributed:    a.distributed,
            pretrained:     a.pretrained,
            device:         a.device,
            seed:           a.seed,
            val_fraction:   a.val_fraction,
            augment:        a.augment,
            context_length: a.context_length,
            vocab_size:     a.vocab_size,
            embed_dim:      a.embed_dim,
            patch_size:     a.patch_size,
            vision_width:   a.vision_width,
            vision_layers:  a.vision_layers,
            vision_heads:   a.vision_heads,
            text_width:     a.text_width,
            text_layers:    a.text_layers,
            text_heads:     a.text_heads,
            dropout:        a.dropout,
        }
    }
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// A .safetensors weights file written by `train`
    #[arg(long)]
    pub checkpoint: PathBuf,
}
