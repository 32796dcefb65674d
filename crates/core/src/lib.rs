//! # IA Hub Core
//!
//! Domain types, collaborator traits and error definitions for the IA Hub
//! message pipeline. This crate has **no framework dependencies**: it
//! defines the model that the store, provider, channel and pipeline crates
//! implement against.
//!
//! Every external system the pipeline talks to is a trait here:
//! - [`Provider`] — text generation and embeddings
//! - [`PromptStore`] / [`DocumentStore`] — tenant prompts and documents
//! - [`HistoryStore`] — per-session conversation memory

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, Role, SessionId, TenantId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use channel::{InboundMessage, OutboundMessage};
pub use store::{Document, DocumentStore, HistoryStore, NewDocument, Prompt, PromptStore, ScoredPassage};
