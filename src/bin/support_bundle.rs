//! The support-bundle binary: collect, redact, analyze, archive.

use clap::Parser;

use periscope::cli::{self, exit, SharedArgs};
use periscope::{PipelineOptions, SupportBundlePipeline};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collect and redact cluster diagnostics into a self-contained archive.
#[derive(Parser)]
#[command(name = "support-bundle")]
#[command(version = VERSION)]
#[command(about = "Collect, redact, and analyze cluster diagnostics into a support bundle")]
#[command(long_about = "
Collect diagnostics from a Kubernetes cluster, stream them through
redaction, analyze the result, and produce a portable tar.gz archive.

Common usage:

  # Run a vendor spec from a file
  support-bundle ./support-bundle.yaml

  # Discover specs stored in the cluster
  support-bundle --selector troubleshoot.sh/kind=support-bundle

  # Continue even when some permissions are missing
  support-bundle ./spec.yaml --collect-without-permissions
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
    if !outcome.analysis.is_empty() {
        cli::print_analysis(&outcome.analysis);
    }
    if let Some(path) = &outcome.archive_path {
        println!("{}", path.display());
    }

    if outcome.is_partial() {
        exit::PARTIAL
    } else if outcome.has_analysis_failures() {
        exit::GENERIC
    } else {
        exit::SUCCESS
    }
}

async fn build_and_run(
    specs: &[String],
    options: PipelineOptions,
) -> periscope::Result<periscope::api::RunOutcome> {
    let pipeline = SupportBundlePipeline::from_locators(specs, options).await?;
    pipeline.run().await
}
