//! Subcommand implementations and the wiring they share.

pub mod ingest;
pub mod migrate;
pub mod process;
pub mod serve;

use iahub_config::AppConfig;
use iahub_core::provider::Provider;
use iahub_pipeline::{DocumentIngestor, MessagePipeline};
use iahub_store::PostgresStore;
use std::path::Path;
use std::sync::Arc;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the config file (explicit or default) with environment overrides.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// Everything a command needs to talk to the database and the model.
pub struct Services {
    pub store: PostgresStore,
    pub provider: Arc<dyn Provider>,
}

impl Services {
    pub async fn connect(config: &AppConfig) -> CliResult<Self> {
        require_api_key(config)?;
        let store = PostgresStore::connect(&config.database).await?;
        let provider = iahub_providers::build_from_config(config)?;
        Ok(Self { store, provider })
    }

    pub fn pipeline(&self, config: &AppConfig) -> MessagePipeline {
        let store = Arc::new(self.store.clone());
        MessagePipeline::new(
            config,
            self.provider.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    pub fn ingestor(&self, config: &AppConfig) -> DocumentIngestor {
        DocumentIngestor::new(
            self.provider.clone(),
            Arc::new(self.store.clone()),
            config.embedding.model.clone(),
            config.embedding.dimensions,
        )
    }
}

fn require_api_key(config: &AppConfig) -> CliResult {
    if config.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    OPENAI_API_KEY=sk-...");
    eprintln!("    IAHUB_API_KEY=sk-...");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

/// Read and parse a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let value = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))?;
    Ok(value)
}
