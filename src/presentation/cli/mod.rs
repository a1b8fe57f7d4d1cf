pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dataweaver")]
#[command(author = "DataWeaver Team")]
#[command(version = "0.1.0")]
#[command(about = "Execution core for the DataWeaver data-integration platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run the execution core (scheduler, runner, audit, telemetry)")]
    Serve {
        #[arg(long, value_name = "FILE", help = "SQLite database file (defaults to config)")]
        database: Option<PathBuf>,

        #[arg(long, help = "Use the in-memory store instead of SQLite")]
        memory: bool,
    },

    #[command(about = "Validate a mapping against its source and target schemas")]
    Validate {
        #[arg(short, long, value_name = "FILE", help = "Mapping JSON file")]
        mapping: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Source schema JSON file")]
        source: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Target schema JSON file")]
        target: PathBuf,
    },

    #[command(about = "Preview a mapping against sample records")]
    Preview {
        #[arg(short, long, value_name = "FILE", help = "Mapping JSON file")]
        mapping: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Source schema JSON file")]
        source: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Target schema JSON file")]
        target: PathBuf,

        #[arg(short, long, value_name = "FILE", help = "Sample records JSON file (array)")]
        records: PathBuf,

        #[arg(short, long, default_value = "10", help = "Maximum records to preview")]
        limit: usize,
    },
}
