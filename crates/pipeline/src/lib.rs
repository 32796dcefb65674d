//! The IA Hub message pipeline.
//!
//! For every inbound message the pipeline:
//!
//! 1. **Resolves the tenant** from the business phone number and the session
//!    from sender + tenant
//! 2. **Resolves the prompt** — the tenant's top active prompt, or the default
//! 3. **Retrieves context** — nearest documents owned by the tenant
//! 4. **Loads history** for the session
//! 5. **Generates** one reply from history, prompt, context and input
//! 6. **Persists** the user and assistant turns together
//!
//! Each step is a component usable on its own; [`MessagePipeline`] wires them.

pub mod conversation;
pub mod ingest;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use conversation::{ConversationMemory, SessionGuard, SessionLocks};
pub use ingest::DocumentIngestor;
pub use orchestrator::{
    GeneratedReply, GenerationOrchestrator, GenerationSettings, compose_messages, history_window,
};
pub use pipeline::{MessagePipeline, PipelineFailure, PipelineStage};
pub use prompt::{DefaultReason, PromptResolver, PromptSource, ResolvedPrompt};
pub use retriever::DocumentRetriever;
pub use retry::RetryPolicy;
