use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use dataweaver::presentation::cli::commands::{PreviewCommand, ServeCommand, ValidateCommand};
use dataweaver::presentation::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("dataweaver=debug,info")
    } else {
        EnvFilter::new("dataweaver=info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { database, memory } => {
            ServeCommand::execute(database.as_deref(), memory).await?;
        }
        Commands::Validate {
            mapping,
            source,
            target,
        } => {
            ValidateCommand::execute(&mapping, &source, &target)?;
        }
        Commands::Preview {
            mapping,
            source,
            target,
            records,
            limit,
        } => {
            PreviewCommand::execute(&mapping, &source, &target, &records, limit)?;
        }
    }

    Ok(())
}
