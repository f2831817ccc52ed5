use anyhow::Result;
use clap::Parser;
use meetsync::{
    app::{self, App},
    cli::{handle_integration_command, handle_meeting_command, handle_sync_command, Cli, CliCommand},
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let command = match cli.command {
        Some(CliCommand::Version) => {
            println!("meetsync {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(command) => command,
        None => CliCommand::Serve,
    };

    let config = Config::load()?;
    match command {
        CliCommand::Sync(args) => handle_sync_command(&App::build(config)?, args).await,
        CliCommand::Meeting(args) => handle_meeting_command(&App::build(config)?, args).await,
        CliCommand::Integration(args) => {
            handle_integration_command(&App::build(config)?, args).await
        }
        CliCommand::Serve | CliCommand::Version => app::run_service(config).await,
    }
}
