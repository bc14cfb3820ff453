//! `client_settings` row model.

use iris_core::client::ClientSettings;
use iris_core::error::CoreError;
use iris_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `client_settings` table.
#[derive(Debug, Clone, FromRow)]
pub struct ClientSettingsRow {
    pub id: String,
    pub client_category: String,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub honorific: Option<String>,
    pub org_name: Option<String>,
    pub zip_code: Option<String>,
    pub language: String,
    pub platform: String,
    pub external_user_id: Option<String>,
    pub is_push_notifications_enabled: bool,
    pub is_appointments_reminder_enabled: bool,
    pub is_todo_notifications_enabled: bool,
    pub first_logged_in_at: Option<Timestamp>,
    pub avatar: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ClientSettingsRow> for ClientSettings {
    type Error = CoreError;

    fn try_from(row: ClientSettingsRow) -> Result<Self, Self::Error> {
        Ok(ClientSettings {
            id: row.id,
            client_category: row.client_category.parse()?,
            phone: row.phone,
            first_name: row.first_name,
            last_name: row.last_name,
            honorific: row.honorific,
            org_name: row.org_name,
            zip_code: row.zip_code,
            language: row.language.parse()?,
            platform: row.platform.parse()?,
            external_user_id: row.external_user_id,
            is_push_notifications_enabled: row.is_push_notifications_enabled,
            is_appointments_reminder_enabled: row.is_appointments_reminder_enabled,
            is_todo_notifications_enabled: row.is_todo_notifications_enabled,
            first_logged_in_at: row.first_logged_in_at,
            avatar: row.avatar,
        })
    }
}
