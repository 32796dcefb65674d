//! `iahub migrate` — Create the database schema.

use iahub_config::AppConfig;
use iahub_store::PostgresStore;

use super::CliResult;

pub async fn run(config: AppConfig) -> CliResult {
    println!("🔄 Applying schema to {}...", config.database.name);

    let store = PostgresStore::connect(&config.database).await?;
    let result = store.migrate().await;
    store.close().await;
    result?;

    println!("✅ Schema is up to date");
    Ok(())
}
