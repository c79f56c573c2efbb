//! hotpush server binary entry point.

use std::process;

use clap::Parser;
use tracing::error;

use hotpush_server::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = hotpush_core::init_logging(
        cli.verbose,
        cli.log_file.as_deref(),
        cli.log_format.into(),
    ) {
        eprintln!("failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = hotpush_server::run(cli).await {
        error!(error = %e, "Server failed");
        process::exit(1);
    }
}
