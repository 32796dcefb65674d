//! Generation — composes one model request per turn.
//!
//! Message order sent to the model:
//!
//! 1. the most recent session history, oldest first (see [`history_window`])
//! 2. a system message with the resolved tenant prompt
//! 3. a system message with the retrieved passages, nearest first, joined by
//!    a blank line (empty when nothing was retrieved)
//! 4. the user's message

use iahub_config::GenerationConfig;
use iahub_core::error::{Error, ProviderError};
use iahub_core::message::{Message, Role};
use iahub_core::provider::{Provider, ProviderRequest, Usage};
use iahub_core::store::ScoredPassage;
use std::sync::Arc;
use tracing::{debug, info};

use crate::prompt::ResolvedPrompt;
use crate::retry::RetryPolicy;

/// Model settings for generation.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// 0 sends the whole history.
    pub max_history_messages: usize,
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_history_messages: config.max_history_messages,
        }
    }
}

/// The outcome of one generation call.
#[derive(Debug, Clone)]
pub struct GeneratedReply {
    pub text: String,
    pub usage: Option<Usage>,
    pub model: String,
    /// The user turn to persist.
    pub user_message: Message,
    /// The assistant turn to persist.
    pub assistant_message: Message,
}

pub struct GenerationOrchestrator {
    provider: Arc<dyn Provider>,
    settings: GenerationSettings,
    retry: RetryPolicy,
}

impl GenerationOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, settings: GenerationSettings) -> Self {
        Self {
            provider,
            settings,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generate the assistant reply for one user turn.
    pub async fn generate(
        &self,
        prompt: &ResolvedPrompt,
        passages: &[ScoredPassage],
        history: &[Message],
        user_input: &str,
    ) -> Result<GeneratedReply, Error> {
        let user_message = Message::user(user_input);
        let window = history_window(history, self.settings.max_history_messages);
        let messages = compose_messages(&prompt.text, passages, window, &user_message);

        debug!(
            model = %self.settings.model,
            history = history.len(),
            sent = window.len(),
            passages = passages.len(),
            "Composed generation request"
        );

        let response = self
            .retry
            .run("generation", ProviderError::is_transient, || {
                self.provider.complete(ProviderRequest {
                    model: self.settings.model.clone(),
                    messages: messages.clone(),
                    temperature: self.settings.temperature,
                    max_tokens: self.settings.max_tokens,
                })
            })
            .await?;

        let text = response.message.content.clone();
        info!(
            model = %response.model,
            total_tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0),
            reply_len = text.len(),
            "Reply generated"
        );

        Ok(GeneratedReply {
            text,
            usage: response.usage,
            model: response.model,
            user_message,
            assistant_message: Message::assistant(response.message.content),
        })
    }
}

/// The tail of `history` sent to the model: at most `max` messages,
/// starting at a user turn. `max == 0` keeps everything.
pub fn history_window(history: &[Message], max: usize) -> &[Message] {
    if max == 0 || history.len() <= max {
        return history;
    }
    let tail = &history[history.len() - max..];
    let start = tail
        .iter()
        .position(|m| m.role == Role::User)
        .unwrap_or(tail.len());
    &tail[start..]
}

/// Build the ordered message list for one turn.
pub fn compose_messages(
    prompt: &str,
    passages: &[ScoredPassage],
    history: &[Message],
    user_message: &Message,
) -> Vec<Message> {
    let context = passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.extend_from_slice(history);
    messages.push(Message::system(prompt));
    messages.push(Message::system(context));
    messages.push(user_message.clone());
    messages
}
