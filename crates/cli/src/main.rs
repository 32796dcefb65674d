//! IA Hub CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Start the HTTP webhook gateway
//! - `process`  — Run one webhook payload through the pipeline
//! - `ingest`   — Embed and store documents for a tenant
//! - `migrate`  — Apply the database schema

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "iahub",
    about = "IA Hub — multi-tenant WhatsApp RAG assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.iahub/config.toml)
    #[arg(short, long, global = true, env = "IAHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Process one webhook payload and print the reply
    Process {
        /// JSON file with a WhatsApp webhook payload
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Add documents to a tenant's knowledge base
    Ingest {
        /// Tenant (business display phone number)
        #[arg(short, long)]
        tenant: String,

        /// JSON file with an array of document strings
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Create the database schema
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Process { file } => commands::process::run(config, &file).await?,
        Commands::Ingest { tenant, file } => commands::ingest::run(config, tenant, &file).await?,
        Commands::Migrate => commands::migrate::run(config).await?,
    }

    Ok(())
}
