//! `triggers` row model.

use iris_core::dispatch::Trigger;
use iris_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `triggers` table.
#[derive(Debug, Clone, FromRow)]
pub struct TriggerRow {
    pub id: String,
    pub dispatch_id: String,
    pub expire_at: Timestamp,
    pub created_at: Timestamp,
}

impl From<TriggerRow> for Trigger {
    fn from(row: TriggerRow) -> Self {
        Trigger {
            id: row.id,
            dispatch_id: row.dispatch_id,
            expire_at: row.expire_at,
        }
    }
}
