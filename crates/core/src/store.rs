//! Store traits — tenant prompts, tenant documents and session history.
//!
//! The pipeline only ever reads prompts and documents; session history is
//! the one store it writes to, and only by appending.
//!
//! Implementations: PostgreSQL + pgvector, in-memory (for testing).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::{Message, SessionId, TenantId};

/// Metadata key that carries the owning tenant on every document.
pub const TENANT_METADATA_KEY: &str = "businessPhoneId";

/// A tenant-specific system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub tenant_id: TenantId,
    pub content: String,
    pub active: bool,
    /// Higher wins.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// A stored, embedded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Document {
    /// The tenant recorded in the document metadata, if any.
    pub fn tenant(&self) -> Option<&str> {
        self.metadata.get(TENANT_METADATA_KEY).and_then(|v| v.as_str())
    }
}

/// A document about to be stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A similarity-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub content: String,
    /// Cosine distance to the query (0 = identical).
    pub distance: f64,
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the prompt table exists at all.
    async fn prompt_store_provisioned(&self) -> Result<bool, StoreError>;

    /// Content of the highest-priority active prompt for the tenant.
    ///
    /// Ties on priority resolve to the most recently created prompt, then to
    /// the highest id.
    async fn top_priority_active_prompt(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<String>, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `k` passages owned by `tenant`, nearest first.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        tenant: &TenantId,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError>;

    /// Store documents for a tenant; returns the generated ids.
    async fn add_documents(
        &self,
        tenant: &TenantId,
        documents: Vec<NewDocument>,
    ) -> Result<Vec<String>, StoreError>;

    /// All documents owned by a tenant, ordered by id, descending.
    async fn list_documents(&self, tenant: &TenantId) -> Result<Vec<Document>, StoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn name(&self) -> &str;

    /// The full ordered history of a session; empty if none exists.
    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError>;

    /// Append messages atomically: all of them are stored or none.
    ///
    /// When `expected_len` is set the append only succeeds if the stored
    /// history currently holds exactly that many messages.
    async fn append_all(
        &self,
        session: &SessionId,
        expected_len: Option<usize>,
        messages: &[Message],
    ) -> Result<(), StoreError>;

    /// Append a single message.
    async fn append(&self, session: &SessionId, message: &Message) -> Result<(), StoreError> {
        self.append_all(session, None, std::slice::from_ref(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_tenant_reads_metadata() {
        let mut metadata = serde_json::Map::new();
        metadata.insert(TENANT_METADATA_KEY.into(), "15550001111".into());
        let doc = Document {
            id: "d1".into(),
            content: "Café da manhã incluso na diária".into(),
            metadata,
            embedding: vec![],
        };
        assert_eq!(doc.tenant(), Some("15550001111"));
    }

    #[test]
    fn document_serialization_skips_embedding() {
        let doc = Document {
            id: "d1".into(),
            content: "x".into(),
            metadata: serde_json::Map::new(),
            embedding: vec![0.5; 4],
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("embedding"));
    }
}
