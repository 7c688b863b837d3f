//! ci-healer CLI entry point.

use clap::Parser;
use tracing::debug;

use ci_healer::cli::{commands, handle_error, Cli, Commands};
use ci_healer::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };
    debug!(command = ?cli.command, "dispatching command");

    let result = match cli.command {
        Commands::Heal(args) => commands::heal::execute(args, &config, cli.json).await,
        Commands::Batch(args) => commands::batch::execute(args, &config, cli.json).await,
        Commands::Results(args) => commands::results::execute(args, &config, cli.json).await,
        Commands::Branch(args) => commands::branch::execute(&args, &config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
