//! WhatsApp Cloud API webhook payloads.
//!
//! Meta delivers inbound messages wrapped in an envelope:
//!
//! ```json
//! { "object": "whatsapp_business_account",
//!   "entry": [{ "id": "<WABA id>",
//!     "changes": [{ "value": {
//!       "metadata": { "display_phone_number": "...", "phone_number_id": "..." },
//!       "messages": [{ "from": "...", "id": "wamid...", "type": "text",
//!                      "text": { "body": "..." } }] } }] }] }
//! ```
//!
//! Internal callers may instead post the flat [`InboundMessage`] shape.

use iahub_core::channel::InboundMessage;
use iahub_core::error::ChannelError;
use serde_json::Value;

/// Parse either a Cloud API envelope or a flat inbound payload.
pub fn parse_payload(payload: &Value) -> Result<InboundMessage, ChannelError> {
    let inbound = if payload.get("entry").is_some() {
        parse_envelope(payload)?
    } else {
        serde_json::from_value::<InboundMessage>(payload.clone())
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?
    };

    if inbound.sender_id.trim().is_empty() {
        return Err(ChannelError::MissingField("sender id"));
    }
    if inbound.tenant_id.trim().is_empty() {
        return Err(ChannelError::MissingField("tenant id"));
    }
    if inbound.message_text.trim().is_empty() {
        return Err(ChannelError::MissingField("message text"));
    }

    Ok(inbound)
}

/// Parse raw request bytes.
pub fn parse_bytes(body: &[u8]) -> Result<InboundMessage, ChannelError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;
    parse_payload(&value)
}

/// True for envelopes that carry only delivery/read statuses and no message.
pub fn is_status_update(payload: &Value) -> bool {
    let value = &payload["entry"][0]["changes"][0]["value"];
    value.get("statuses").is_some() && value.get("messages").is_none()
}

fn parse_envelope(payload: &Value) -> Result<InboundMessage, ChannelError> {
    let entry = &payload["entry"][0];
    let value = &entry["changes"][0]["value"];
    let metadata = &value["metadata"];
    let message = value
        .get("messages")
        .and_then(|m| m.get(0))
        .ok_or(ChannelError::MissingField("messages[0]"))?;

    let kind = message["type"].as_str().unwrap_or("text");
    if kind != "text" {
        return Err(ChannelError::UnsupportedMessage(kind.to_string()));
    }

    let sender_id = str_field(message, "from").ok_or(ChannelError::MissingField("from"))?;
    let message_text = message["text"]["body"]
        .as_str()
        .ok_or(ChannelError::MissingField("text.body"))?;
    let tenant_id = str_field(metadata, "display_phone_number")
        .ok_or(ChannelError::MissingField("metadata.display_phone_number"))?;

    Ok(InboundMessage {
        sender_id,
        message_text: message_text.to_string(),
        tenant_id,
        message_id: str_field(message, "id"),
        phone_number_id: str_field(metadata, "phone_number_id"),
        business_account_id: str_field(entry, "id"),
        timestamp: str_field(message, "timestamp"),
    })
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

/// Verify Meta's `X-Hub-Signature-256` header against the raw body.
///
/// The header has the form `sha256=<hex_digest>`. Comparison is constant-time.
pub fn verify_signature(app_secret: &str, body: &[u8], header: &str) -> Result<(), ChannelError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let sig_hex = header.strip_prefix("sha256=").unwrap_or(header);
    let provided = hex::decode(sig_hex).map_err(|_| ChannelError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| ChannelError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| ChannelError::InvalidSignature)
}
