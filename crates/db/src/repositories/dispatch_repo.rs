//! Repository for the `dispatches` table.
//!
//! Every state transition is a single conditional `UPDATE` so concurrent
//! firing paths cannot both claim or both complete the same dispatch.

use iris_core::dispatch::{FailureReason, NewDispatch, ProviderResult};
use iris_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::dispatch::DispatchRow;

/// Column list for `dispatches` queries.
const COLUMNS: &str = "id, dispatch_id, correlation_id, notification_type, \
    recipient_client_id, sender_client_id, content_key, content, triggers_at, triggered_id, \
    status, provider, provider_message_id, sent_at, retry_count, failure_reasons, deleted, \
    created_at, updated_at";

/// Provides read/write operations for dispatches.
pub struct DispatchRepo;

impl DispatchRepo {
    /// Insert a new dispatch or refresh the active one with the same id.
    ///
    /// An existing active row is only overwritten while it is still
    /// `received`. Returns `None` when the active row has already moved on,
    /// in which case nothing was written.
    pub async fn upsert_received(
        pool: &PgPool,
        new: &NewDispatch,
    ) -> Result<Option<DispatchRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO dispatches \
                (dispatch_id, correlation_id, notification_type, recipient_client_id, \
                 sender_client_id, content_key, content, triggers_at, triggered_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (dispatch_id) WHERE NOT deleted DO UPDATE SET \
                correlation_id = EXCLUDED.correlation_id, \
                notification_type = EXCLUDED.notification_type, \
                recipient_client_id = EXCLUDED.recipient_client_id, \
                sender_client_id = EXCLUDED.sender_client_id, \
                content_key = EXCLUDED.content_key, \
                content = EXCLUDED.content, \
                triggers_at = EXCLUDED.triggers_at, \
                triggered_id = EXCLUDED.triggered_id, \
                updated_at = now() \
             WHERE dispatches.status = 'received' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchRow>(&query)
            .bind(&new.dispatch_id)
            .bind(&new.correlation_id)
            .bind(new.notification_type.as_str())
            .bind(&new.recipient_client_id)
            .bind(&new.sender_client_id)
            .bind(new.content_key.as_str())
            .bind(Json(&new.content))
            .bind(new.triggers_at)
            .bind(&new.triggered_id)
            .fetch_optional(pool)
            .await
    }

    /// Find the active (non-deleted) dispatch with this id.
    pub async fn find_active(
        pool: &PgPool,
        dispatch_id: &str,
    ) -> Result<Option<DispatchRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM dispatches WHERE dispatch_id = $1 AND NOT deleted");
        sqlx::query_as::<_, DispatchRow>(&query)
            .bind(dispatch_id)
            .fetch_optional(pool)
            .await
    }

    /// Find the active dispatch with this id, falling back to the most
    /// recently created soft-deleted one.
    pub async fn find_latest(
        pool: &PgPool,
        dispatch_id: &str,
    ) -> Result<Option<DispatchRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatches WHERE dispatch_id = $1 \
             ORDER BY deleted ASC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, DispatchRow>(&query)
            .bind(dispatch_id)
            .fetch_optional(pool)
            .await
    }

    /// Claim a `received` dispatch for sending (`received -> acquired`).
    ///
    /// Returns the claimed row, or `None` if another path claimed it first
    /// or it is not eligible.
    pub async fn acquire(
        pool: &PgPool,
        dispatch_id: &str,
    ) -> Result<Option<DispatchRow>, sqlx::Error> {
        let query = format!(
            "UPDATE dispatches SET status = 'acquired', updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status = 'received' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchRow>(&query)
            .bind(dispatch_id)
            .fetch_optional(pool)
            .await
    }

    /// Hand a claim back (`acquired -> received`) after a step following the
    /// claim failed before anything was sent.
    pub async fn release(pool: &PgPool, dispatch_id: &str) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET status = 'received', updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status = 'acquired'",
        )
        .bind(dispatch_id)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Record a successful send (`acquired -> done`).
    pub async fn complete(
        pool: &PgPool,
        dispatch_id: &str,
        result: &ProviderResult,
        sent_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET status = 'done', provider = $2, provider_message_id = $3, \
                sent_at = $4, triggered_id = NULL, updated_at = now() \
             WHERE id = (SELECT id FROM dispatches WHERE dispatch_id = $1 \
                         AND status = 'acquired' ORDER BY deleted ASC, id DESC LIMIT 1)",
        )
        .bind(dispatch_id)
        .bind(result.provider.as_str())
        .bind(&result.id)
        .bind(sent_at)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Record a policy refusal (`acquired -> error`) without counting a retry.
    pub async fn refuse(
        pool: &PgPool,
        dispatch_id: &str,
        reason: &FailureReason,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET status = 'error', \
                failure_reasons = failure_reasons || $2, \
                triggered_id = NULL, updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status = 'acquired'",
        )
        .bind(dispatch_id)
        .bind(Json(std::slice::from_ref(reason)))
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Record a provider failure and put the dispatch back to `received`
    /// with a new schedule.
    pub async fn fail_and_rearm(
        pool: &PgPool,
        dispatch_id: &str,
        reason: &FailureReason,
        triggers_at: Timestamp,
        triggered_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET status = 'received', retry_count = retry_count + 1, \
                failure_reasons = failure_reasons || $2, \
                triggers_at = $3, triggered_id = $4, updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status = 'acquired'",
        )
        .bind(dispatch_id)
        .bind(Json(std::slice::from_ref(reason)))
        .bind(triggers_at)
        .bind(triggered_id)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Record a provider failure that exhausted the retries (`acquired -> error`).
    pub async fn fail_terminal(
        pool: &PgPool,
        dispatch_id: &str,
        reason: &FailureReason,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET status = 'error', retry_count = retry_count + 1, \
                failure_reasons = failure_reasons || $2, \
                triggered_id = NULL, updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status = 'acquired'",
        )
        .bind(dispatch_id)
        .bind(Json(std::slice::from_ref(reason)))
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Soft-delete the active dispatch unless it was already delivered.
    pub async fn soft_delete_undelivered(
        pool: &PgPool,
        dispatch_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET deleted = true, triggered_id = NULL, updated_at = now() \
             WHERE dispatch_id = $1 AND NOT deleted AND status <> 'done'",
        )
        .bind(dispatch_id)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Soft-delete every active dispatch where the client is recipient or
    /// sender. Returns the affected dispatch ids.
    pub async fn soft_delete_for_client(
        pool: &PgPool,
        client_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE dispatches SET deleted = true, triggered_id = NULL, updated_at = now() \
             WHERE (recipient_client_id = $1 OR sender_client_id = $1) AND NOT deleted \
             RETURNING dispatch_id",
        )
        .bind(client_id)
        .fetch_all(pool)
        .await
    }

    /// Permanently delete every dispatch (active or soft-deleted) where the
    /// client is recipient or sender. Returns the affected dispatch ids.
    pub async fn hard_delete_for_client(
        pool: &PgPool,
        client_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "DELETE FROM dispatches \
             WHERE recipient_client_id = $1 OR sender_client_id = $1 \
             RETURNING dispatch_id",
        )
        .bind(client_id)
        .fetch_all(pool)
        .await
    }

    /// Point every undelivered active dispatch of `recipient` at a new sender.
    pub async fn update_sender(
        pool: &PgPool,
        recipient_client_id: &str,
        sender_client_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let outcome = sqlx::query(
            "UPDATE dispatches SET sender_client_id = $2, updated_at = now() \
             WHERE recipient_client_id = $1 AND NOT deleted AND status <> 'done'",
        )
        .bind(recipient_client_id)
        .bind(sender_client_id)
        .execute(pool)
        .await?;
        Ok(outcome.rows_affected())
    }
}
