//! `iahub ingest` — Embed and store documents for a tenant.

use iahub_config::AppConfig;
use iahub_core::message::TenantId;
use std::path::Path;

use super::{CliResult, Services, read_json};

pub async fn run(config: AppConfig, tenant: String, file: &Path) -> CliResult {
    let documents: Vec<String> = read_json(file)?;
    let tenant = TenantId::new(tenant);

    let services = Services::connect(&config).await?;
    let result = services.ingestor(&config).ingest(&tenant, documents).await;
    services.store.close().await;

    let ids = result?;
    println!("✅ Added {} document(s) for {tenant}", ids.len());
    for id in ids {
        println!("   {id}");
    }
    Ok(())
}
