//! Store implementations for IA Hub.
//!
//! Prompts, documents and conversation history all live behind the traits in
//! `iahub_core::store`; this crate provides the backends.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use vector::{cosine_distance, cosine_similarity, to_pgvector_literal};

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
