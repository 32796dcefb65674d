//! Document ingestion: embed texts and store them under a tenant.

use iahub_core::error::{Error, ProviderError, RetrievalError};
use iahub_core::message::TenantId;
use iahub_core::provider::{EmbeddingRequest, Provider};
use iahub_core::store::{Document, DocumentStore, NewDocument};
use std::sync::Arc;
use tracing::info;

/// Texts per embedding call.
const EMBED_BATCH: usize = 64;

pub struct DocumentIngestor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn DocumentStore>,
    embedding_model: String,
    dimensions: usize,
}

impl DocumentIngestor {
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
        }
    }

    /// Embed and store `texts` for `tenant`; returns the new document ids.
    pub async fn ingest(&self, tenant: &TenantId, texts: Vec<String>) -> Result<Vec<String>, Error> {
        if tenant.as_str().trim().is_empty() {
            return Err(Error::config("tenant id must not be empty"));
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::config("documents must not be empty"));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let response = self
                .provider
                .embed(EmbeddingRequest {
                    model: self.embedding_model.clone(),
                    inputs: batch.to_vec(),
                })
                .await
                .map_err(RetrievalError::Embedding)?;

            if response.embeddings.len() != batch.len() {
                return Err(RetrievalError::Embedding(ProviderError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )))
                .into());
            }

            for (content, embedding) in batch.iter().zip(response.embeddings) {
                if embedding.len() != self.dimensions {
                    return Err(RetrievalError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: embedding.len(),
                    }
                    .into());
                }
                documents.push(NewDocument {
                    content: content.clone(),
                    embedding,
                });
            }
        }

        let ids = self
            .store
            .add_documents(tenant, documents)
            .await
            .map_err(Error::Persistence)?;

        info!(tenant = %tenant, count = ids.len(), "Ingested documents");
        Ok(ids)
    }

    /// All documents stored for `tenant`, ordered by id, descending. Ids are
    /// random UUIDs, so the order is stable but says nothing about age.
    pub async fn list(&self, tenant: &TenantId) -> Result<Vec<Document>, Error> {
        self.store
            .list_documents(tenant)
            .await
            .map_err(Error::Persistence)
    }
}
