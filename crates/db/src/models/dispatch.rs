//! `dispatches` row model.

use iris_core::dispatch::{Dispatch, DispatchContent, FailureReason, ProviderResult};
use iris_core::error::CoreError;
use iris_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `dispatches` table.
#[derive(Debug, Clone, FromRow)]
pub struct DispatchRow {
    pub id: i64,
    pub dispatch_id: String,
    pub correlation_id: Option<String>,
    pub notification_type: String,
    pub recipient_client_id: String,
    pub sender_client_id: Option<String>,
    pub content_key: String,
    pub content: Json<DispatchContent>,
    pub triggers_at: Option<Timestamp>,
    pub triggered_id: Option<String>,
    pub status: String,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<Timestamp>,
    pub retry_count: i32,
    pub failure_reasons: Json<Vec<FailureReason>>,
    pub deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<DispatchRow> for Dispatch {
    type Error = CoreError;

    fn try_from(row: DispatchRow) -> Result<Self, Self::Error> {
        let provider_result = match (row.provider, row.provider_message_id) {
            (Some(provider), Some(id)) => Some(ProviderResult {
                provider: provider.parse()?,
                id,
            }),
            (None, None) => None,
            _ => {
                return Err(CoreError::Validation(format!(
                    "dispatch {} has a partial provider result",
                    row.dispatch_id
                )))
            }
        };

        Ok(Dispatch {
            notification_type: row.notification_type.parse()?,
            content_key: row.content_key.parse()?,
            status: row.status.parse()?,
            dispatch_id: row.dispatch_id,
            correlation_id: row.correlation_id,
            recipient_client_id: row.recipient_client_id,
            sender_client_id: row.sender_client_id,
            content: row.content.0,
            triggers_at: row.triggers_at,
            triggered_id: row.triggered_id,
            provider_result,
            sent_at: row.sent_at,
            retry_count: row.retry_count,
            failure_reasons: row.failure_reasons.0,
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
