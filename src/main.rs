use clap::Parser;
use event_transport::cli::Cli;
use event_transport::config;
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> event_transport::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    cli.init_logging();

    let config = config::load_config(cli.config.as_deref())?;

    event_transport::run_command(cli.command, config).await
}
