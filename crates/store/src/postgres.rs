//! PostgreSQL + pgvector store.
//!
//! Implements [`PromptStore`], [`DocumentStore`] and [`HistoryStore`] with:
//! - A bounded shared `sqlx` pool sized from [`DatabaseConfig`]
//! - Vector similarity search using pgvector's `<=>` operator
//! - Atomic per-turn history appends guarded by a transaction-scoped
//!   advisory lock on the session key
//!
//! # Setup
//!
//! ```sql
//! CREATE EXTENSION IF NOT EXISTS vector;
//! ```
//!
//! Then run the migration in `migrations/001_create_iahub.sql`
//! (`iahub migrate` does this).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use iahub_config::DatabaseConfig;
use iahub_core::error::StoreError;
use iahub_core::message::{Message, Role, SessionId, TenantId};
use iahub_core::store::{
    Document, DocumentStore, HistoryStore, NewDocument, PromptStore, ScoredPassage,
    TENANT_METADATA_KEY,
};

use crate::vector::to_pgvector_literal;

/// PostgreSQL store backed by a shared connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect using the database section of the configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = pool_options(config)
            .connect_with(connect_options(config)?)
            .await
            .map_err(|e| StoreError::Unavailable(format!("PostgreSQL connection failed: {e}")))?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Build the pool without opening a connection yet.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = pool_options(config).connect_lazy_with(connect_options(config)?);
        Ok(Self { pool })
    }

    /// Run the schema migration.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;

        info!("IA Hub schema migration complete");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}

/// Schema applied by [`PostgresStore::migrate`].
pub const MIGRATION_SQL: &str = include_str!("../migrations/001_create_iahub.sql");

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
}

/// Connection options from either the URL or the discrete fields.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, StoreError> {
    let options = match &config.url {
        Some(url) => url
            .parse::<PgConnectOptions>()
            .map_err(|e| StoreError::Unavailable(format!("Invalid database URL: {e}")))?,
        None => {
            let mut options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .database(&config.name);
            if let Some(password) = &config.password {
                options = options.password(password);
            }
            options
        }
    };

    Ok(if config.ssl {
        options.ssl_mode(PgSslMode::Require)
    } else {
        options
    })
}

/// Classify a driver error.
fn map_err(context: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => {
            StoreError::ResourceExhausted(format!("{context}: timed out acquiring a connection"))
        }
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(format!("{context}: {e}"))
        }
        other => StoreError::QueryFailed(format!("{context}: {other}")),
    }
}

// ── History rows ─────────────────────────────────────────────────────────

/// One `message` column value, in LangChain's `message_to_dict` layout.
#[derive(Debug, Deserialize)]
struct StoredMessage {
    #[serde(rename = "type")]
    kind: String,
    data: StoredData,
}

#[derive(Debug, Deserialize)]
struct StoredData {
    content: serde_json::Value,
    #[serde(default)]
    id: Option<String>,
}

fn stored_kind(role: Role) -> &'static str {
    match role {
        Role::User => "human",
        Role::Assistant => "ai",
        Role::System => "system",
    }
}

/// Encode a message for the `message` column.
fn to_stored_message(message: &Message) -> serde_json::Value {
    serde_json::json!({
        "type": stored_kind(message.role),
        "data": {
            "content": message.content,
            "additional_kwargs": {},
            "response_metadata": {},
            "type": stored_kind(message.role),
            "name": null,
            "id": message.id,
        },
    })
}

/// Decode a `message` column value. Tool and function messages have no
/// counterpart here and decode to `None`.
fn from_stored_message(
    row_id: i32,
    value: serde_json::Value,
    timestamp: DateTime<Utc>,
) -> Result<Option<Message>, StoreError> {
    let stored: StoredMessage = serde_json::from_value(value)
        .map_err(|e| StoreError::QueryFailed(format!("Malformed history row {row_id}: {e}")))?;

    let role = match stored.kind.as_str() {
        "human" => Role::User,
        "ai" => Role::Assistant,
        "system" => Role::System,
        other => {
            debug!(row_id, kind = other, "Skipping history row");
            return Ok(None);
        }
    };

    // Content is either a string or a list of content parts.
    let content = match stored.data.content {
        serde_json::Value::String(text) => text,
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.as_str().or_else(|| part["text"].as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    Ok(Some(Message {
        id: stored.data.id.unwrap_or_else(|| format!("row-{row_id}")),
        role,
        content,
        timestamp,
    }))
}

#[async_trait]
impl PromptStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn prompt_store_provisioned(&self) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = 'prompts')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err("Prompt table check failed", e))
    }

    async fn top_priority_active_prompt(
        &self,
        tenant: &TenantId,
    ) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT content FROM prompts \
             WHERE business_phone_id = $1 AND active = true \
             ORDER BY priority DESC, created_at DESC, id DESC \
             LIMIT 1",
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err("Prompt lookup failed", e))
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        tenant: &TenantId,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError> {
        let rows = sqlx::query(
            "SELECT content, (vector <=> $1::vector)::float8 AS distance \
             FROM embeddings \
             WHERE metadata->>'businessPhoneId' = $2 \
             ORDER BY vector <=> $1::vector ASC \
             LIMIT $3",
        )
        .bind(to_pgvector_literal(embedding))
        .bind(tenant.as_str())
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("Similarity search failed", e))?;

        debug!(tenant = %tenant, hits = rows.len(), "Similarity search");

        Ok(rows
            .iter()
            .map(|row| ScoredPassage {
                content: row.get::<Option<String>, _>("content").unwrap_or_default(),
                distance: row.get("distance"),
            })
            .collect())
    }

    async fn add_documents(
        &self,
        tenant: &TenantId,
        documents: Vec<NewDocument>,
    ) -> Result<Vec<String>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_err("Document insert failed", e))?;

        let mut ids = Vec::with_capacity(documents.len());
        for doc in &documents {
            let id = Uuid::new_v4();
            let mut metadata = serde_json::Map::new();
            metadata.insert(TENANT_METADATA_KEY.into(), tenant.as_str().into());

            sqlx::query(
                "INSERT INTO embeddings (id, vector, content, metadata) \
                 VALUES ($1, $2::vector, $3, $4)",
            )
            .bind(id)
            .bind(to_pgvector_literal(&doc.embedding))
            .bind(&doc.content)
            .bind(serde_json::Value::Object(metadata))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("Document insert failed", e))?;

            ids.push(id.to_string());
        }

        tx.commit()
            .await
            .map_err(|e| map_err("Document insert failed", e))?;

        info!(tenant = %tenant, count = ids.len(), "Stored documents");
        Ok(ids)
    }

    async fn list_documents(&self, tenant: &TenantId) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, content, metadata FROM embeddings \
             WHERE metadata->>'businessPhoneId' = $1 \
             ORDER BY id DESC",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("Document listing failed", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata = match row.get::<serde_json::Value, _>("metadata") {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                Document {
                    id: row.get::<Uuid, _>("id").to_string(),
                    content: row.get::<Option<String>, _>("content").unwrap_or_default(),
                    metadata,
                    // Not loaded by default (expensive)
                    embedding: Vec::new(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl HistoryStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, message, created_at FROM langchain_chat_histories \
             WHERE session_id = $1 ORDER BY id ASC",
        )
        .bind(session.key())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_err("History load failed", e))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(message) =
                from_stored_message(row.get("id"), row.get("message"), row.get("created_at"))?
            {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn append_all(
        &self,
        session: &SessionId,
        expected_len: Option<usize>,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let key = session.key();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_err("History append failed", e))?;

        // Serializes writers of this session until commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("History lock failed", e))?;

        if let Some(expected) = expected_len {
            let actual: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM langchain_chat_histories \
                 WHERE session_id = $1 AND message->>'type' IN ('human', 'ai', 'system')",
            )
            .bind(&key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_err("History length check failed", e))?;

            if actual as usize != expected {
                warn!(session = %key, expected, actual, "History changed since load");
                return Err(StoreError::Conflict {
                    session: key,
                    expected,
                    actual: actual as usize,
                });
            }
        }

        for message in messages {
            sqlx::query(
                "INSERT INTO langchain_chat_histories (session_id, message, created_at) \
                 VALUES ($1, $2, $3)",
            )
            .bind(&key)
            .bind(to_stored_message(message))
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("History append failed", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_err("History commit failed", e))?;

        debug!(session = %key, count = messages.len(), "Appended history");
        Ok(())
    }
}

// ── Unit tests (no DB required) ──────────────────────────────────────────
