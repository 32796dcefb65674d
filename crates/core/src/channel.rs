//! Inbound and outbound channel records.
//!
//! An [`InboundMessage`] is what a messaging channel hands the pipeline; an
//! [`OutboundMessage`] is what the pipeline hands back to the delivery
//! layer. Both carry the routing metadata needed to reach the right
//! business number and recipient.

use serde::{Deserialize, Serialize};
use crate::message::{SessionId, TenantId};
use crate::provider::Usage;

/// A text message received from an end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// End-user identifier (WhatsApp `from`)
    pub sender_id: String,

    /// The text body
    pub message_text: String,

    /// The business display phone number the user wrote to
    pub tenant_id: String,

    /// Platform message id, echoed back as the reply target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Numeric phone number id used by the delivery API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,

    /// WhatsApp Business Account id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_account_id: Option<String>,

    /// Platform timestamp (seconds since epoch, as sent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl InboundMessage {
    pub fn tenant(&self) -> TenantId {
        TenantId::new(self.tenant_id.clone())
    }

    pub fn session(&self) -> SessionId {
        SessionId::new(self.sender_id.clone(), self.tenant())
    }
}

/// A generated reply, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Recipient: the original sender
    pub to: String,

    /// The reply text
    pub text: String,

    /// Tenant the reply is sent from
    pub tenant_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_account_id: Option<String>,

    /// The inbound message this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,

    /// Model that produced the reply
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl OutboundMessage {
    /// Build the reply record for an inbound message.
    pub fn reply_to(
        inbound: &InboundMessage,
        text: impl Into<String>,
        model: impl Into<String>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            to: inbound.sender_id.clone(),
            text: text.into(),
            tenant_id: inbound.tenant_id.clone(),
            phone_number_id: inbound.phone_number_id.clone(),
            business_account_id: inbound.business_account_id.clone(),
            reply_to_message_id: inbound.message_id.clone(),
            model: model.into(),
            usage,
        }
    }
}
