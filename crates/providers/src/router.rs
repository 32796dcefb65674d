//! Provider selection — builds the configured model backend.

use crate::openai_compat::OpenAiCompatProvider;
use iahub_core::error::ProviderError;
use iahub_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the provider described by configuration.
///
/// Every supported backend speaks the OpenAI wire format; `provider.name`
/// only picks the default base URL when `provider.api_url` is unset.
pub fn build_from_config(
    config: &iahub_config::AppConfig,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = &config.provider.name;
    let base_url = config.provider.base_url().ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "unknown provider '{name}' and no provider.api_url"
        ))
    })?;
    let api_key = config.api_key.clone().unwrap_or_default();

    tracing::debug!(provider = %name, base_url = %base_url, "Building provider");

    Ok(Arc::new(
        OpenAiCompatProvider::new(name, base_url, api_key)
            .with_timeout(Duration::from_secs(config.generation.timeout_secs)),
    ))
}
