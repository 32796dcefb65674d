//! Tenant prompt resolution.
//!
//! A tenant's system prompt is its highest-priority active prompt. Anything
//! short of that (no prompt table, no active prompt, store down) falls back to
//! the configured default and is logged, never raised.

use iahub_core::error::StoreError;
use iahub_core::message::TenantId;
use iahub_core::store::PromptStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Why the default prompt was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultReason {
    NotProvisioned,
    NoActivePrompt,
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    Custom,
    Default(DefaultReason),
}

/// The system prompt chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPrompt {
    pub text: String,
    pub source: PromptSource,
}

impl ResolvedPrompt {
    pub fn is_custom(&self) -> bool {
        self.source == PromptSource::Custom
    }
}

pub struct PromptResolver {
    store: Arc<dyn PromptStore>,
    default_prompt: String,
    /// Set once the table check has succeeded; failed checks are retried.
    provisioned: OnceCell<bool>,
}

impl PromptResolver {
    pub fn new(store: Arc<dyn PromptStore>, default_prompt: impl Into<String>) -> Self {
        Self {
            store,
            default_prompt: default_prompt.into(),
            provisioned: OnceCell::new(),
        }
    }

    pub fn default_prompt(&self) -> &str {
        &self.default_prompt
    }

    /// Check (once) whether the prompt table exists.
    pub async fn check_provisioned(&self) -> Result<bool, StoreError> {
        let provisioned = self
            .provisioned
            .get_or_try_init(|| async {
                let provisioned = self.store.prompt_store_provisioned().await?;
                info!(
                    store = self.store.name(),
                    provisioned, "Prompt store capability resolved"
                );
                Ok::<bool, StoreError>(provisioned)
            })
            .await?;
        Ok(*provisioned)
    }

    /// Resolve the system prompt for a tenant. Never fails.
    pub async fn resolve(&self, tenant: &TenantId) -> ResolvedPrompt {
        match self.check_provisioned().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(tenant = %tenant, "Prompt table missing, using default prompt");
                return self.fallback(DefaultReason::NotProvisioned);
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Prompt table check failed, using default prompt");
                return self.fallback(DefaultReason::StoreUnavailable);
            }
        }

        match self.store.top_priority_active_prompt(tenant).await {
            Ok(Some(text)) => {
                info!(tenant = %tenant, "Using custom prompt");
                ResolvedPrompt {
                    text,
                    source: PromptSource::Custom,
                }
            }
            Ok(None) => {
                info!(tenant = %tenant, "No active custom prompt, using default prompt");
                self.fallback(DefaultReason::NoActivePrompt)
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Prompt lookup failed, using default prompt");
                self.fallback(DefaultReason::StoreUnavailable)
            }
        }
    }

    fn fallback(&self, reason: DefaultReason) -> ResolvedPrompt {
        ResolvedPrompt {
            text: self.default_prompt.clone(),
            source: PromptSource::Default(reason),
        }
    }
}
