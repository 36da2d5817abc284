//! PRM CLI - train, apply and evaluate the personalized re-ranker.

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use prm_cli::{exit_code, Cli};

fn main() -> ExitCode {
    // Initialize tracing subscriber with environment filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prm=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cli = Cli::parse();
    let started = Instant::now();

    match cli.run() {
        Ok(()) => {
            info!(
                elapsed_secs = started.elapsed().as_secs(),
                "Job done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}
