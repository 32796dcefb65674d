//! `iahub process` — Run one webhook payload through the pipeline.

use iahub_config::AppConfig;
use std::path::Path;

use super::{CliResult, Services, read_json};

pub async fn run(config: AppConfig, file: &Path) -> CliResult {
    let payload: serde_json::Value = read_json(file)?;

    let services = Services::connect(&config).await?;
    let result = services.pipeline(&config).process_payload(&payload).await;
    services.store.close().await;

    match result {
        Ok(outbound) => {
            println!("{}", serde_json::to_string_pretty(&outbound)?);
            Ok(())
        }
        Err(failure) => {
            eprintln!(
                "❌ {} error at stage {} (retryable: {})",
                failure.kind(),
                failure.stage,
                failure.is_retryable()
            );
            Err(failure.into())
        }
    }
}
