mod cmd;

use clap::Parser;
use cmd::config::{Effective, RunArgs};
use harness::HarnessError;

#[derive(Parser)]
#[command(name = "scenario-runner", about = "Streaming detection test harness")]
struct Cli {
    #[command(flatten)]
    args: RunArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let result = match Effective::new(&cli.args) {
        Ok(eff) => cmd::run::run(eff).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        std::process::exit(report(&e));
    }
}

/// Single place where failures become exit codes.
fn report(e: &HarnessError) -> i32 {
    if e.is_recoverable() {
        tracing::error!(error = %e, "action aborted");
    } else {
        tracing::error!(error = %e, "failed");
        eprintln!("Error: {e}");
    }
    e.exit_code()
}
