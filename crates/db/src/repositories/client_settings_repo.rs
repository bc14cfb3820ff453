//! Repository for the `client_settings` table.

use iris_core::client::ClientSettingsUpdate;
use sqlx::PgPool;

use crate::models::client_settings::ClientSettingsRow;

/// Column list for `client_settings` queries.
const COLUMNS: &str = "id, client_category, phone, first_name, last_name, honorific, \
    org_name, zip_code, language, platform, external_user_id, \
    is_push_notifications_enabled, is_appointments_reminder_enabled, \
    is_todo_notifications_enabled, first_logged_in_at, avatar, created_at, updated_at";

/// Provides read/write operations for client settings.
pub struct ClientSettingsRepo;

impl ClientSettingsRepo {
    pub async fn find_by_id(
        pool: &PgPool,
        id: &str,
    ) -> Result<Option<ClientSettingsRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM client_settings WHERE id = $1");
        sqlx::query_as::<_, ClientSettingsRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert or merge a settings record in one statement.
    ///
    /// Absent fields take column defaults on insert and keep the stored
    /// value on update.
    pub async fn upsert(
        pool: &PgPool,
        update: &ClientSettingsUpdate,
    ) -> Result<ClientSettingsRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO client_settings \
                (id, client_category, phone, first_name, last_name, honorific, org_name, \
                 zip_code, language, platform, external_user_id, \
                 is_push_notifications_enabled, is_appointments_reminder_enabled, \
                 is_todo_notifications_enabled, first_logged_in_at, avatar) \
             VALUES ($1, COALESCE($2, 'member'), $3, $4, $5, $6, $7, $8, \
                 COALESCE($9, 'en'), COALESCE($10, 'web'), $11, \
                 COALESCE($12, false), COALESCE($13, true), COALESCE($14, true), $15, $16) \
             ON CONFLICT (id) DO UPDATE SET \
                client_category = COALESCE($2, client_settings.client_category), \
                phone = COALESCE($3, client_settings.phone), \
                first_name = COALESCE($4, client_settings.first_name), \
                last_name = COALESCE($5, client_settings.last_name), \
                honorific = COALESCE($6, client_settings.honorific), \
                org_name = COALESCE($7, client_settings.org_name), \
                zip_code = COALESCE($8, client_settings.zip_code), \
                language = COALESCE($9, client_settings.language), \
                platform = COALESCE($10, client_settings.platform), \
                external_user_id = COALESCE($11, client_settings.external_user_id), \
                is_push_notifications_enabled = \
                    COALESCE($12, client_settings.is_push_notifications_enabled), \
                is_appointments_reminder_enabled = \
                    COALESCE($13, client_settings.is_appointments_reminder_enabled), \
                is_todo_notifications_enabled = \
                    COALESCE($14, client_settings.is_todo_notifications_enabled), \
                first_logged_in_at = COALESCE($15, client_settings.first_logged_in_at), \
                avatar = COALESCE($16, client_settings.avatar), \
                updated_at = now() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ClientSettingsRow>(&query)
            .bind(&update.id)
            .bind(update.client_category.map(|c| c.as_str()))
            .bind(&update.phone)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.honorific)
            .bind(&update.org_name)
            .bind(&update.zip_code)
            .bind(update.language.map(|l| l.as_str()))
            .bind(update.platform.map(|p| p.as_str()))
            .bind(&update.external_user_id)
            .bind(update.is_push_notifications_enabled)
            .bind(update.is_appointments_reminder_enabled)
            .bind(update.is_todo_notifications_enabled)
            .bind(update.first_logged_in_at)
            .bind(&update.avatar)
            .fetch_one(pool)
            .await
    }

    /// Delete a settings record. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM client_settings WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
