//! In-memory store — useful for testing and ephemeral runs.
//!
//! Implements all three store traits over `RwLock`-guarded collections and
//! mirrors the ordering rules of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iahub_core::error::StoreError;
use iahub_core::message::{Message, SessionId, TenantId};
use iahub_core::store::{
    Document, DocumentStore, HistoryStore, NewDocument, Prompt, PromptStore, ScoredPassage,
    TENANT_METADATA_KEY,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::vector::cosine_distance;

pub struct InMemoryStore {
    provisioned: AtomicBool,
    next_prompt_id: AtomicI64,
    prompts: Arc<RwLock<Vec<Prompt>>>,
    documents: Arc<RwLock<Vec<Document>>>,
    histories: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            provisioned: AtomicBool::new(true),
            next_prompt_id: AtomicI64::new(1),
            prompts: Arc::new(RwLock::new(Vec::new())),
            documents: Arc::new(RwLock::new(Vec::new())),
            histories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A store whose prompt table does not exist.
    pub fn without_prompt_table() -> Self {
        let store = Self::new();
        store.provisioned.store(false, Ordering::SeqCst);
        store
    }

    /// Insert a prompt created now; returns its id.
    pub async fn insert_prompt(
        &self,
        tenant: &TenantId,
        content: impl Into<String>,
        priority: i32,
        active: bool,
    ) -> i64 {
        self.insert_prompt_at(tenant, content, priority, active, Utc::now())
            .await
    }

    /// Insert a prompt with an explicit creation time; returns its id.
    pub async fn insert_prompt_at(
        &self,
        tenant: &TenantId,
        content: impl Into<String>,
        priority: i32,
        active: bool,
        created_at: DateTime<Utc>,
    ) -> i64 {
        let id = self.next_prompt_id.fetch_add(1, Ordering::SeqCst);
        self.prompts.write().await.push(Prompt {
            id,
            tenant_id: tenant.clone(),
            content: content.into(),
            active,
            priority,
            created_at,
        });
        id
    }

    /// Number of stored messages across all sessions.
    pub async fn message_count(&self) -> usize {
        self.histories.read().await.values().map(Vec::len).sum()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn prompt_store_provisioned(&self) -> Result<bool, StoreError> {
        Ok(self.provisioned.load(Ordering::SeqCst))
    }

    async fn top_priority_active_prompt(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<String>, StoreError> {
        let prompts = self.prompts.read().await;
        Ok(prompts
            .iter()
            .filter(|p| p.active && &p.tenant_id == tenant)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|p| p.content.clone()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        tenant: &TenantId,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError> {
        let documents = self.documents.read().await;
        let mut scored: Vec<ScoredPassage> = documents
            .iter()
            .filter(|d| d.tenant() == Some(tenant.as_str()))
            .map(|d| ScoredPassage {
                content: d.content.clone(),
                distance: cosine_distance(&d.embedding, embedding),
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn add_documents(
        &self,
        tenant: &TenantId,
        documents: Vec<NewDocument>,
    ) -> Result<Vec<String>, StoreError> {
        let mut stored = self.documents.write().await;
        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            let id = Uuid::new_v4().to_string();
            let mut metadata = serde_json::Map::new();
            metadata.insert(TENANT_METADATA_KEY.into(), tenant.as_str().into());
            stored.push(Document {
                id: id.clone(),
                content: doc.content,
                metadata,
                embedding: doc.embedding,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn list_documents(&self, tenant: &TenantId) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.read().await;
        let mut owned: Vec<Document> = documents
            .iter()
            .filter(|d| d.tenant() == Some(tenant.as_str()))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(owned)
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .histories
            .read()
            .await
            .get(&session.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn append_all(
        &self,
        session: &SessionId,
        expected_len: Option<usize>,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let key = session.key();
        let mut histories = self.histories.write().await;
        let history = histories.entry(key.clone()).or_default();

        if let Some(expected) = expected_len
            && history.len() != expected
        {
            return Err(StoreError::Conflict {
                session: key,
                expected,
                actual: history.len(),
            });
        }

        history.extend_from_slice(messages);
        Ok(())
    }
}
