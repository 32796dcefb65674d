//! `iahub serve` — Start the HTTP gateway.

use iahub_config::AppConfig;
use iahub_gateway::GatewayState;
use std::sync::Arc;
use tracing::{info, warn};

use super::{CliResult, Services};

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> CliResult {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let services = Services::connect(&config).await?;
    let pipeline = services.pipeline(&config);

    match pipeline.prompts().check_provisioned().await {
        Ok(true) => info!("Prompt table found"),
        Ok(false) => warn!("Prompt table missing, every tenant gets the default prompt"),
        Err(e) => warn!(error = %e, "Prompt table check failed, will retry on first message"),
    }

    match services.provider.health_check().await {
        Ok(true) => info!(provider = services.provider.name(), "Model API reachable"),
        Ok(false) => warn!(
            provider = services.provider.name(),
            "Model API rejected the health check, check the API key"
        ),
        Err(e) => warn!(provider = services.provider.name(), error = %e, "Model API unreachable"),
    }

    println!("🤖 IA Hub Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model: {}", config.generation.model);
    println!(
        "   Signature check: {}",
        if config.gateway.app_secret.is_some() { "on" } else { "off" }
    );

    let state = Arc::new(GatewayState {
        pipeline: Arc::new(pipeline),
        ingestor: Arc::new(services.ingestor(&config)),
        app_secret: config.gateway.app_secret.clone(),
    });

    let served = iahub_gateway::start(&config.gateway, state, shutdown_signal()).await;
    services.store.close().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
