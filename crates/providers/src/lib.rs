//! Model provider implementations for IA Hub.
//!
//! All providers implement the `iahub_core::Provider` trait.
//! [`build_from_config`] selects the backend from configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
