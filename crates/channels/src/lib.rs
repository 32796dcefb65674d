//! Messaging channel adapters for IA Hub.
//!
//! Available channels:
//! - **WhatsApp** — Cloud API webhook payload parsing and signature checks

pub mod whatsapp;

pub use whatsapp::{is_status_update, parse_bytes, parse_payload, verify_signature};
