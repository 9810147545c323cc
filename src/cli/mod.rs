// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and hands the work to Layer 2 (application).
//
// Three commands are supported:
//   1. `train`    — fit the classifier on one fold
//   2. `evaluate` — score the best checkpoint of a run
//   3. `inspect`  — push one sample through the pipeline
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, InspectArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "duke-mri",
    version = "0.1.0",
    about = "Train and evaluate a malignancy classifier on 3D breast MRI volumes."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Routing and printing only.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
            Commands::Inspect(args)  => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on fold {} from '{}'", args.data.fold, args.data.path_root.display());

    let use_case = TrainUseCase::new(args.into());
    let report   = use_case.execute()?;

    match &report.fit.best_checkpoint {
        Some(path) => println!("Training complete. Best checkpoint: {}", path.display()),
        None       => println!("Training complete. No epochs were run."),
    }
    if let Some(test) = &report.test {
        println!(
            "Test | samples={} | loss={:.4} | ACC={:.4} | AUC_ROC={:.4}",
            test.samples, test.loss, test.acc, test.auc_roc,
        );
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let use_case = EvaluateUseCase::new(args.checkpoint_dir, args.split, args.device, args.path_root);
    let summary  = use_case.execute()?;

    println!(
        "{} | samples={} | loss={:.4} | ACC={:.4} | AUC_ROC={:.4}",
        summary.split, summary.samples, summary.loss, summary.acc, summary.auc_roc,
    );
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let use_case = InspectUseCase::new(
        args.dataset_config(),
        args.transform_config(),
        args.split,
        args.index,
    );
    let r = use_case.execute()?;

    println!("Dataset:  {} samples", r.dataset_len);
    println!("Pipeline: {}", r.pipeline);
    println!("Subject:  {} (target {})", r.uid, r.target);
    println!("Shape:    {:?}  spacing {:?}", r.shape, r.spacing);
    println!("Range:    [{:.4}, {:.4}]  mean {:.4}", r.min, r.max, r.mean);
    Ok(())
}
