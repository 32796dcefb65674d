//! The message-processing pipeline.
//!
//! One inbound message moves through these stages, strictly in order:
//!
//! ```text
//! Received → TenantResolved → PromptResolved → ContextRetrieved
//!          → HistoryLoaded → Generated → HistoryPersisted → Completed
//! ```
//!
//! Any failure ends the request at the stage it was in, and nothing after
//! that stage is committed. Requests for the same session are serialized from
//! history load through history persist; the persist step runs in its own
//! task so that a dropped request still writes its turn completely.

use iahub_config::AppConfig;
use iahub_core::channel::{InboundMessage, OutboundMessage};
use iahub_core::error::{Error, ErrorKind, StoreError};
use iahub_core::provider::Provider;
use iahub_core::store::{DocumentStore, HistoryStore, PromptStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::conversation::{ConversationMemory, SessionLocks};
use crate::orchestrator::{GenerationOrchestrator, GenerationSettings};
use crate::prompt::PromptResolver;
use crate::retriever::DocumentRetriever;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    TenantResolved,
    PromptResolved,
    ContextRetrieved,
    HistoryLoaded,
    Generated,
    HistoryPersisted,
    Completed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::TenantResolved => "tenant_resolved",
            Self::PromptResolved => "prompt_resolved",
            Self::ContextRetrieved => "context_retrieved",
            Self::HistoryLoaded => "history_loaded",
            Self::Generated => "generated",
            Self::HistoryPersisted => "history_persisted",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that ended in `Failed`.
#[derive(Debug, thiserror::Error)]
#[error("pipeline failed after stage {stage}: {error}")]
pub struct PipelineFailure {
    /// The last stage reached before the failure.
    pub stage: PipelineStage,
    #[source]
    pub error: Error,
}

impl PipelineFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

/// Drives one inbound message to one outbound reply.
pub struct MessagePipeline {
    prompts: PromptResolver,
    retriever: DocumentRetriever,
    memory: Arc<ConversationMemory>,
    orchestrator: GenerationOrchestrator,
    locks: SessionLocks,
    top_k: usize,
}

impl MessagePipeline {
    /// Wire the pipeline from configuration and its collaborators.
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        prompt_store: Arc<dyn PromptStore>,
        document_store: Arc<dyn DocumentStore>,
        history_store: Arc<dyn HistoryStore>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            prompts: PromptResolver::new(prompt_store, config.prompts.default_prompt.clone()),
            retriever: DocumentRetriever::new(
                provider.clone(),
                document_store,
                config.embedding.model.clone(),
                config.embedding.dimensions,
            )
            .with_retry(retry),
            memory: Arc::new(ConversationMemory::new(history_store)),
            orchestrator: GenerationOrchestrator::new(
                provider,
                GenerationSettings::from(&config.generation),
            )
            .with_retry(retry),
            locks: SessionLocks::new(),
            top_k: config.retrieval.top_k,
        }
    }

    pub fn prompts(&self) -> &PromptResolver {
        &self.prompts
    }

    /// Parse a raw webhook payload and process it.
    pub async fn process_payload(
        &self,
        payload: &serde_json::Value,
    ) -> Result<OutboundMessage, PipelineFailure> {
        let inbound = iahub_channels::parse_payload(payload).map_err(|e| PipelineFailure {
            stage: PipelineStage::Received,
            error: e.into(),
        })?;
        self.process(inbound).await
    }

    /// Process one parsed inbound message.
    pub async fn process(&self, inbound: InboundMessage) -> Result<OutboundMessage, PipelineFailure> {
        let span = info_span!(
            "message",
            tenant = %inbound.tenant_id,
            session = %inbound.session(),
        );
        self.run(inbound).instrument(span).await
    }

    async fn run(&self, inbound: InboundMessage) -> Result<OutboundMessage, PipelineFailure> {
        let started = std::time::Instant::now();
        let mut stage = PipelineStage::Received;
        trace!(text = %inbound.message_text, "Inbound message");

        let result = self.stages(&inbound, &mut stage).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outbound) => {
                info!(elapsed_ms, "Message processed");
                Ok(outbound)
            }
            Err(error) => {
                warn!(
                    stage = %stage,
                    kind = %error.kind(),
                    error = %error,
                    elapsed_ms,
                    "Message processing failed"
                );
                Err(PipelineFailure { stage, error })
            }
        }
    }

    async fn stages(
        &self,
        inbound: &InboundMessage,
        stage: &mut PipelineStage,
    ) -> Result<OutboundMessage, Error> {
        if inbound.tenant_id.trim().is_empty() || inbound.sender_id.trim().is_empty() {
            return Err(Error::config("inbound message is missing tenant or sender id"));
        }
        let tenant = inbound.tenant();
        let session = inbound.session();
        advance(stage, PipelineStage::TenantResolved);

        let prompt = self.prompts.resolve(&tenant).await;
        advance(stage, PipelineStage::PromptResolved);

        let passages = self
            .retriever
            .retrieve(&tenant, &inbound.message_text, self.top_k)
            .await?;
        advance(stage, PipelineStage::ContextRetrieved);

        let guard = self.locks.acquire(&session).await;
        let history = self.memory.load(&session).await?;
        advance(stage, PipelineStage::HistoryLoaded);

        let reply = self
            .orchestrator
            .generate(&prompt, &passages, &history, &inbound.message_text)
            .await?;
        advance(stage, PipelineStage::Generated);

        // The write owns the session guard and outlives this future.
        let memory = self.memory.clone();
        let expected_len = history.len();
        let (user, assistant) = (reply.user_message.clone(), reply.assistant_message.clone());
        let write_session = session.clone();
        let write = tokio::spawn(
            async move {
                let result = memory
                    .append_turn(&write_session, Some(expected_len), &user, &assistant)
                    .await;
                drop(guard);
                result
            }
            .in_current_span(),
        );
        write.await.map_err(|e| {
            Error::Persistence(StoreError::QueryFailed(format!("history write task failed: {e}")))
        })??;
        advance(stage, PipelineStage::HistoryPersisted);

        let outbound = OutboundMessage::reply_to(inbound, reply.text, reply.model, reply.usage);
        advance(stage, PipelineStage::Completed);
        Ok(outbound)
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    debug!(from = %stage, to = %next, "Stage complete");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProvider, TEST_DIMENSIONS, TestHistoryStore};
    use iahub_config::DEFAULT_SYSTEM_PROMPT;
    use iahub_core::error::ProviderError;
    use iahub_core::message::{Message, Role, SessionId, TenantId};
    use iahub_core::store::NewDocument;
    use iahub_store::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    const TENANT: &str = "15550001111";
    const SENDER: &str = "5511999990000";

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.model = "mock-embedding".into();
        config.embedding.dimensions = TEST_DIMENSIONS;
        config.retry.backoff_ms = 100;
        config
    }

    fn pipeline_with(
        provider: Arc<MockProvider>,
        store: Arc<InMemoryStore>,
        history: Arc<dyn HistoryStore>,
    ) -> MessagePipeline {
        MessagePipeline::new(&config(), provider, store.clone(), store, history)
    }

    fn pipeline(provider: Arc<MockProvider>, store: Arc<InMemoryStore>) -> MessagePipeline {
        pipeline_with(provider, store.clone(), store)
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            sender_id: SENDER.into(),
            message_text: text.into(),
            tenant_id: TENANT.into(),
            message_id: Some("wamid.1".into()),
            phone_number_id: Some("106540352242922".into()),
            business_account_id: Some("102290129340398".into()),
            timestamp: None,
        }
    }

    fn session() -> SessionId {
        SessionId::new(SENDER, TenantId::new(TENANT))
    }

    async fn seed_documents(store: &InMemoryStore, provider: &MockProvider, texts: &[&str]) {
        let docs = texts
            .iter()
            .map(|t| NewDocument {
                content: t.to_string(),
                embedding: provider.vectorize(t),
            })
            .collect();
        store.add_documents(&TenantId::new(TENANT), docs).await.unwrap();
    }

    #[tokio::test]
    async fn two_turns_build_ordered_history() {
        let provider = Arc::new(MockProvider::new().with_replies(&["Olá! Como posso ajudar?", "R$ 300 por noite"]));
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(provider.clone(), store.clone());

        let first = pipeline.process(inbound("Oi")).await.unwrap();
        let second = pipeline.process(inbound("Qual o preço?")).await.unwrap();
        assert_eq!(first.text, "Olá! Como posso ajudar?");
        assert_eq!(second.text, "R$ 300 por noite");

        let history = store.load(&session()).await.unwrap();
        let turns: Vec<(Role, &str)> = history.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            turns,
            vec![
                (Role::User, "Oi"),
                (Role::Assistant, "Olá! Como posso ajudar?"),
                (Role::User, "Qual o preço?"),
                (Role::Assistant, "R$ 300 por noite"),
            ]
        );

        // The second request saw the first turn as history.
        let second_request = &provider.requests()[1];
        assert_eq!(second_request.messages[0].content, "Oi");
        assert_eq!(second_request.messages[1].content, "Olá! Como posso ajudar?");
    }

    #[tokio::test]
    async fn outbound_echoes_routing_metadata() {
        let provider = Arc::new(MockProvider::new().with_replies(&["Olá!"]));
        let pipeline = pipeline(provider, Arc::new(InMemoryStore::new()));

        let out = pipeline.process(inbound("Oi")).await.unwrap();
        assert_eq!(out.to, SENDER);
        assert_eq!(out.tenant_id, TENANT);
        assert_eq!(out.phone_number_id.as_deref(), Some("106540352242922"));
        assert_eq!(out.reply_to_message_id.as_deref(), Some("wamid.1"));
        assert_eq!(out.model, "mock-model");
    }

    #[tokio::test]
    async fn default_prompt_and_retrieved_context_reach_the_model() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(InMemoryStore::new());
        seed_documents(
            &store,
            &provider,
            &[
                "A pousada possui 4 acomodações",
                "Café da manhã incluso na diária",
            ],
        )
        .await;
        let pipeline = pipeline(provider.clone(), store);

        pipeline
            .process(inbound("o que está incluso no café?"))
            .await
            .unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert!(request.messages[1]
            .content
            .starts_with("Café da manhã incluso na diária\n\n"));
        assert_eq!(request.messages[2].content, "o que está incluso no café?");
    }

    #[tokio::test]
    async fn custom_prompt_is_used_for_its_tenant_only() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_prompt(&TenantId::new(TENANT), "Você atende a Pousada Sol.", 1, true)
            .await;
        let pipeline = pipeline(provider.clone(), store);

        pipeline.process(inbound("Oi")).await.unwrap();
        let mut other = inbound("Oi");
        other.tenant_id = "15559998888".into();
        pipeline.process(other).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].messages[0].content, "Você atende a Pousada Sol.");
        assert_eq!(requests[1].messages[0].content, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn generation_failure_leaves_history_untouched() {
        let provider = Arc::new(MockProvider::new().fail_completions(vec![
            ProviderError::AuthenticationFailed("bad key".into()),
        ]));
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(provider, store.clone());

        let failure = pipeline.process(inbound("Oi")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Generation);
        assert!(!failure.is_retryable());
        assert_eq!(failure.stage, PipelineStage::HistoryLoaded);
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retrieval_failure_is_retried_once_then_fatal() {
        let provider = Arc::new(MockProvider::new().fail_embeddings(usize::MAX));
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(provider.clone(), store.clone());

        let failure = pipeline.process(inbound("Oi")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Retrieval);
        assert!(failure.is_retryable());
        assert_eq!(failure.stage, PipelineStage::PromptResolved);
        assert_eq!(provider.embed_calls(), 2);
        assert_eq!(provider.complete_calls(), 0);
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(InMemoryStore::new());
        let history = Arc::new(TestHistoryStore::new(store.clone()).failing_appends());
        let pipeline = pipeline_with(provider, store, history);

        let failure = pipeline.process(inbound("Oi")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Persistence);
        assert_eq!(failure.stage, PipelineStage::Generated);
    }

    #[tokio::test]
    async fn long_session_still_generates_and_keeps_full_history() {
        let provider = Arc::new(
            MockProvider::new()
                .with_context_limit(30)
                .with_replies(&["Claro!"]),
        );
        let store = Arc::new(InMemoryStore::new());
        let earlier: Vec<Message> = (0..50)
            .flat_map(|i| [Message::user(format!("q{i}")), Message::assistant(format!("a{i}"))])
            .collect();
        store.append_all(&session(), None, &earlier).await.unwrap();

        let pipeline = pipeline(provider.clone(), store.clone());
        let outbound = pipeline.process(inbound("E o check-in?")).await.unwrap();
        assert_eq!(outbound.text, "Claro!");

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 20 + 3);
        assert_eq!(request.messages[0].content, "q40");

        let history = store.load(&session()).await.unwrap();
        assert_eq!(history.len(), 102);
        assert_eq!(history[0].content, "q0");
        assert_eq!(history[101].content, "Claro!");
    }

    #[tokio::test]
    async fn unbounded_window_overflows_the_model_context() {
        let provider = Arc::new(MockProvider::new().with_context_limit(30));
        let store = Arc::new(InMemoryStore::new());
        let earlier: Vec<Message> = (0..50)
            .flat_map(|i| [Message::user(format!("q{i}")), Message::assistant(format!("a{i}"))])
            .collect();
        store.append_all(&session(), None, &earlier).await.unwrap();

        let mut config = config();
        config.generation.max_history_messages = 0;
        let pipeline = MessagePipeline::new(
            &config,
            provider.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
        );

        let failure = pipeline.process(inbound("Oi")).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Generation);
        assert!(!failure.is_retryable());
        assert_eq!(store.load(&session()).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_configuration_failure() {
        let provider = Arc::new(MockProvider::new());
        let pipeline = pipeline(provider.clone(), Arc::new(InMemoryStore::new()));

        let failure = pipeline
            .process_payload(&json!({"senderId": "1", "tenantId": "T"}))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Configuration);
        assert!(!failure.is_retryable());
        assert_eq!(failure.stage, PipelineStage::Received);
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn cloud_envelope_is_processed() {
        let provider = Arc::new(MockProvider::new().with_replies(&["Olá!"]));
        let pipeline = pipeline(provider, Arc::new(InMemoryStore::new()));
        let payload = json!({
            "entry": [{
                "id": "102290129340398",
                "changes": [{ "value": {
                    "metadata": { "display_phone_number": TENANT, "phone_number_id": "106540352242922" },
                    "messages": [{ "from": SENDER, "id": "wamid.2", "type": "text", "text": { "body": "Oi" } }]
                }}]
            }]
        });

        let out = pipeline.process_payload(&payload).await.unwrap();
        assert_eq!(out.text, "Olá!");
        assert_eq!(out.reply_to_message_id.as_deref(), Some("wamid.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_for_one_session_do_not_interleave() {
        let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(200)));
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(provider.clone(), store.clone());

        let (a, b) = tokio::join!(
            pipeline.process(inbound("primeira")),
            pipeline.process(inbound("segunda")),
        );
        a.unwrap();
        b.unwrap();

        let history = store.load(&session()).await.unwrap();
        assert_eq!(history.len(), 4);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("eco: {}", pair[0].content));
        }

        // Whichever ran second saw the first turn.
        let requests = provider.requests();
        assert_eq!(requests[1].messages.len(), requests[0].messages.len() + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_request_still_writes_its_turn() {
        let provider = Arc::new(MockProvider::new().with_replies(&["Olá!"]));
        let store = Arc::new(InMemoryStore::new());
        let history = Arc::new(
            TestHistoryStore::new(store.clone()).with_append_delay(Duration::from_millis(500)),
        );
        let pipeline = pipeline_with(provider, store.clone(), history);

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), pipeline.process(inbound("Oi"))).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stored = store.load(&session()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].content, "Oi");
        assert_eq!(stored[1].content, "Olá!");
    }
}
