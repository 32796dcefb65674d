//! Tenant-scoped document retrieval.
//!
//! Embeds the query with the ingestion embedding model and asks the document
//! store for the nearest passages owned by the tenant.

use iahub_core::error::{Error, ProviderError, RetrievalError};
use iahub_core::message::TenantId;
use iahub_core::provider::{EmbeddingRequest, Provider};
use iahub_core::store::{DocumentStore, ScoredPassage};
use std::sync::Arc;
use tracing::debug;

use crate::retry::RetryPolicy;

pub struct DocumentRetriever {
    provider: Arc<dyn Provider>,
    store: Arc<dyn DocumentStore>,
    embedding_model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl DocumentRetriever {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn DocumentStore>,
        embedding_model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            provider,
            store,
            embedding_model: embedding_model.into(),
            dimensions,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Up to `k` passages for `tenant`, nearest first.
    pub async fn retrieve(
        &self,
        tenant: &TenantId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, Error> {
        if k == 0 {
            return Err(Error::config("retrieval k must be at least 1"));
        }

        let passages = self
            .retry
            .run(
                "retrieval",
                |e: &RetrievalError| !matches!(e, RetrievalError::DimensionMismatch { .. }),
                || self.search_once(tenant, query, k),
            )
            .await?;

        debug!(tenant = %tenant, k, hits = passages.len(), "Retrieved passages");
        Ok(passages)
    }

    async fn search_once(
        &self,
        tenant: &TenantId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let embedding = embed_one(
            self.provider.as_ref(),
            &self.embedding_model,
            self.dimensions,
            query,
        )
        .await?;

        self.store
            .similarity_search(&embedding, tenant, k)
            .await
            .map_err(RetrievalError::Search)
    }
}

/// Embed a single text and check its dimensionality.
pub(crate) async fn embed_one(
    provider: &dyn Provider,
    model: &str,
    dimensions: usize,
    text: &str,
) -> Result<Vec<f32>, RetrievalError> {
    let response = provider
        .embed(EmbeddingRequest {
            model: model.to_string(),
            inputs: vec![text.to_string()],
        })
        .await
        .map_err(RetrievalError::Embedding)?;

    let embedding = response.embeddings.into_iter().next().ok_or_else(|| {
        RetrievalError::Embedding(ProviderError::InvalidResponse(
            "Embedding response was empty".into(),
        ))
    })?;

    if embedding.len() != dimensions {
        return Err(RetrievalError::DimensionMismatch {
            expected: dimensions,
            actual: embedding.len(),
        });
    }

    Ok(embedding)
}
