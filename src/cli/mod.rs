// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and routes to Layer 2.
//
//   train     trains the dual encoder and checkpoints the best epoch
//   inspect   lists the tensors of a saved weights file

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, InspectArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "cli2p-train",
    version,
    about = "Train a CLIP-style image–text dual encoder with a contrastive loss."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Inspect(args) => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on dataset: {}", args.dataset_path.display());

    let use_case = TrainUseCase::new(args.into());
    let report   = use_case.execute()?;

    let improved = report.epochs.iter().filter(|e| e.improved).count();
    println!(
        "Training complete. {} epochs ({} improved), best val_loss={:.4}, final lr={:.3e}",
        report.epochs.len(),
        improved,
        report.best_val_loss,
        report.final_lr
    );
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let summary = InspectUseCase::new(&args.checkpoint).execute()?;

    for t in &summary.tensors {
        println!("{:<56} {:?}", t.name, t.shape);
    }
    println!(
        "\n{} tensors, {} parameters",
        summary.tensors.len(),
        summary.parameter_count
    );
    if let Some(fit) = &summary.config_fit {
        println!(
            "Against train_config.json: {} loadable, {} unmatched, {} model tensors not covered",
            fit.loaded.len(),
            fit.unmatched.len(),
            fit.missing.len()
        );
    }
    Ok(())
}
