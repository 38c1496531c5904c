//! The preflight binary: run the collection+analysis pipeline pre-install
//! and return a go/no-go verdict.

use clap::Parser;

use periscope::cli::{self, exit, SharedArgs};
use periscope::{PipelineOptions, PreflightPipeline};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Evaluate cluster requirements before installing.
#[derive(Parser)]
#[command(name = "preflight")]
#[command(version = VERSION)]
#[command(about = "Run preflight checks against a cluster and report a verdict")]
#[command(long_about = "
Run the same collection and analysis pipeline as support-bundle without
producing an archive: collectors capture cluster state, analyzers evaluate
it against the spec's requirements, and the verdict decides the exit code.

Common usage:

  # Check a vendor preflight spec
  preflight ./preflight.yaml

  # Read the spec from a cluster secret
  preflight secret/default/app-preflight
")]
struct Cli {
    #[command(flatten)]
    shared: SharedArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli::init_tracing(cli.shared.debug);
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let (options, progress) = match cli.shared.pipeline_options() {
        Ok(built) => built,
        Err(e) => {
            eprintln!("Error: {e}");
            return cli::exit_code_for(&e);
        }
    };

    let outcome = match build_and_run(&cli.shared.specs, options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            return cli::exit_code_for(&e);
        }
    };
    progress.finish().await;

    for warning in &outcome.warnings {
        eprintln!("Warning: {warning}");
    }
    cli::print_analysis(&outcome.analysis);

    if outcome.failed() {
        exit::GENERIC
    } else {
        exit::SUCCESS
    }
}

async fn build_and_run(
    specs: &[String],
    options: PipelineOptions,
) -> periscope::Result<periscope::api::PreflightOutcome> {
    let pipeline = PreflightPipeline::from_locators(specs, options).await?;
    pipeline.run().await
}
