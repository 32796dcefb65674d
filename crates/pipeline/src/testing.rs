//! Test doubles for the pipeline's collaborators.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for
//! downstream crates' tests.

use async_trait::async_trait;
use iahub_core::error::{ProviderError, StoreError};
use iahub_core::message::{Message, Role, SessionId};
use iahub_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use iahub_core::store::HistoryStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Dimensionality of [`MockProvider`] embeddings.
pub const TEST_DIMENSIONS: usize = 256;

/// A provider with scripted completions and bag-of-words embeddings.
///
/// Completions pop the next scripted reply; once the script is exhausted
/// the provider echoes the last user message. Embeddings give every distinct
/// lowercase word its own dimension, so texts sharing words are close.
pub struct MockProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
    vocabulary: Mutex<HashMap<String, usize>>,
    complete_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    completion_failures: Mutex<VecDeque<ProviderError>>,
    embed_failures: AtomicUsize,
    delay: Duration,
    context_limit: Option<usize>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            vocabulary: Mutex::new(HashMap::new()),
            complete_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            completion_failures: Mutex::new(VecDeque::new()),
            embed_failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
            context_limit: None,
        }
    }

    pub fn with_replies(self, replies: &[&str]) -> Self {
        self.replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        self
    }

    /// Fail the next completions with these errors, in order.
    pub fn fail_completions(self, errors: Vec<ProviderError>) -> Self {
        self.completion_failures.lock().unwrap().extend(errors);
        self
    }

    /// Fail the next `times` embedding calls with a network error.
    pub fn fail_embeddings(self, times: usize) -> Self {
        self.embed_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every completion.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject requests carrying more than `messages` messages, the way a
    /// model rejects an overflowing context window.
    pub fn with_context_limit(mut self, messages: usize) -> Self {
        self.context_limit = Some(messages);
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    /// Every completion request received, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The embedding this provider produces for `text`.
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut vector = vec![0.0; TEST_DIMENSIONS];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let next = vocabulary.len();
            let slot = *vocabulary.entry(word.to_string()).or_insert(next) % TEST_DIMENSIONS;
            vector[slot] += 1.0;
        }
        vector
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(err) = self.completion_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        if let Some(limit) = self.context_limit
            && request.messages.len() > limit
        {
            return Err(ProviderError::ApiError {
                status_code: 400,
                message: format!(
                    "context_length_exceeded: {} messages, limit {limit}",
                    request.messages.len()
                ),
            });
        }

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            format!("eco: {last_user}")
        });

        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.embed_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.embed_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Network("connection reset".into()));
        }

        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| self.vectorize(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}

/// Wraps a history store with slow or failing writes.
pub struct TestHistoryStore {
    inner: Arc<dyn HistoryStore>,
    append_delay: Duration,
    fail_appends: bool,
}

impl TestHistoryStore {
    pub fn new(inner: Arc<dyn HistoryStore>) -> Self {
        Self {
            inner,
            append_delay: Duration::ZERO,
            fail_appends: false,
        }
    }

    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = delay;
        self
    }

    pub fn failing_appends(mut self) -> Self {
        self.fail_appends = true;
        self
    }
}

#[async_trait]
impl HistoryStore for TestHistoryStore {
    fn name(&self) -> &str {
        "test_history"
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.inner.load(session).await
    }

    async fn append_all(
        &self,
        session: &SessionId,
        expected_len: Option<usize>,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        if !self.append_delay.is_zero() {
            tokio::time::sleep(self.append_delay).await;
        }
        if self.fail_appends {
            return Err(StoreError::Unavailable("history store is down".into()));
        }
        self.inner.append_all(session, expected_len, messages).await
    }
}
