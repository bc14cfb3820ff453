//! Inbound queue message envelope.
//!
//! Every message is a JSON object with a `type` discriminant and the
//! type-specific fields flattened beside it:
//!
//! ```json
//! { "type": "deleteDispatch", "dispatchId": "newMember_m1" }
//! ```

use iris_core::client::ClientSettingsUpdate;
use iris_core::dispatch::CreateDispatch;
use iris_core::types::ClientId;
use serde::Deserialize;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueMessage {
    UpdateClientSettings(ClientSettingsUpdate),
    DeleteClientSettings(DeleteClientSettings),
    CreateDispatch(CreateDispatch),
    DeleteDispatch(DeleteDispatch),
    UpdateSenderClientId(UpdateSenderClientId),
}

impl QueueMessage {
    /// The wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueMessage::UpdateClientSettings(_) => "updateClientSettings",
            QueueMessage::DeleteClientSettings(_) => "deleteClientSettings",
            QueueMessage::CreateDispatch(_) => "createDispatch",
            QueueMessage::DeleteDispatch(_) => "deleteDispatch",
            QueueMessage::UpdateSenderClientId(_) => "updateSenderClientId",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            QueueMessage::UpdateClientSettings(m) => m.validate(),
            QueueMessage::DeleteClientSettings(m) => m.validate(),
            QueueMessage::CreateDispatch(m) => m.validate(),
            QueueMessage::DeleteDispatch(m) => m.validate(),
            QueueMessage::UpdateSenderClientId(m) => m.validate(),
        }
    }
}

/// Remove a client's settings and cascade to every dispatch where the
/// client is recipient or sender.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClientSettings {
    #[validate(length(min = 1))]
    pub id: ClientId,
    /// Physically delete dispatches instead of soft-deleting them.
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDispatch {
    #[validate(length(min = 1))]
    pub dispatch_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSenderClientId {
    #[validate(length(min = 1))]
    pub recipient_client_id: ClientId,
    #[validate(length(min = 1))]
    pub sender_client_id: ClientId,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Parse and validate a raw queue message body.
pub fn parse_message(body: &str) -> Result<QueueMessage, MessageError> {
    let message: QueueMessage = serde_json::from_str(body)?;
    message.validate()?;
    Ok(message)
}
