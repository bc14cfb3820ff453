//! Repository for the `triggers` table.

use iris_core::dispatch::Trigger;
use iris_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::trigger::TriggerRow;

/// Column list for `triggers` queries.
const COLUMNS: &str = "id, dispatch_id, expire_at, created_at";

/// Provides read/write operations for dispatch triggers.
pub struct TriggerRepo;

impl TriggerRepo {
    /// Arm a trigger, replacing any existing trigger for the same dispatch.
    pub async fn arm(pool: &PgPool, trigger: &Trigger) -> Result<TriggerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO triggers (id, dispatch_id, expire_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (dispatch_id) DO UPDATE SET \
                id = EXCLUDED.id, expire_at = EXCLUDED.expire_at, created_at = now() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TriggerRow>(&query)
            .bind(&trigger.id)
            .bind(&trigger.dispatch_id)
            .bind(trigger.expire_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_dispatch_id(
        pool: &PgPool,
        dispatch_id: &str,
    ) -> Result<Option<TriggerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM triggers WHERE dispatch_id = $1");
        sqlx::query_as::<_, TriggerRow>(&query)
            .bind(dispatch_id)
            .fetch_optional(pool)
            .await
    }

    /// Triggers with `expire_at <= now`, oldest first.
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<TriggerRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM triggers WHERE expire_at <= $1 \
             ORDER BY expire_at ASC LIMIT $2"
        );
        sqlx::query_as::<_, TriggerRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete the dispatch's trigger only if it expires at or before `up_to`.
    ///
    /// A trigger re-armed further in the future survives.
    pub async fn consume(
        pool: &PgPool,
        dispatch_id: &str,
        up_to: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM triggers WHERE dispatch_id = $1 AND expire_at <= $2")
            .bind(dispatch_id)
            .bind(up_to)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, dispatch_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM triggers WHERE dispatch_id = $1")
            .bind(dispatch_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the triggers of every listed dispatch. Returns the count removed.
    pub async fn delete_many(pool: &PgPool, dispatch_ids: &[String]) -> Result<u64, sqlx::Error> {
        if dispatch_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM triggers WHERE dispatch_id = ANY($1)")
            .bind(dispatch_ids)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
