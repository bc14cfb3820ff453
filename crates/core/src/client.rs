//! Per-client contact details and notification preferences.
//!
//! A client is either a member (the person being coached) or a user (the
//! coach, nurse or other staff). Settings arrive through
//! `updateClientSettings` queue messages and are merged field by field.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::{ClientId, Timestamp};

define_str_enum! {
    /// Which side of the platform a client belongs to.
    ClientCategory ("client category") {
        Member = "member",
        User = "user",
    }
}

define_str_enum! {
    /// The client's primary app platform.
    Platform ("platform") {
        Web = "web",
        Ios = "ios",
        Android = "android",
    }
}

impl Platform {
    /// Native app platforms can receive push notifications and VoIP calls.
    pub fn is_mobile(self) -> bool {
        matches!(self, Platform::Ios | Platform::Android)
    }
}

define_str_enum! {
    /// Language used to render message templates.
    Language ("language") {
        En = "en",
        Es = "es",
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

// ---------------------------------------------------------------------------
// ClientSettings
// ---------------------------------------------------------------------------

/// The stored settings record for one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    pub id: ClientId,
    pub client_category: ClientCategory,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Title shown before a user's last name (e.g. "Dr.").
    pub honorific: Option<String>,
    pub org_name: Option<String>,
    pub zip_code: Option<String>,
    pub language: Language,
    pub platform: Platform,
    /// Id of this client in the push provider (OneSignal external user id).
    pub external_user_id: Option<String>,
    pub is_push_notifications_enabled: bool,
    pub is_appointments_reminder_enabled: bool,
    pub is_todo_notifications_enabled: bool,
    pub first_logged_in_at: Option<Timestamp>,
    pub avatar: Option<String>,
}

impl ClientSettings {
    /// A fresh record with platform defaults: web platform, English, push
    /// off, reminders and todo notifications on.
    pub fn new(id: impl Into<ClientId>, client_category: ClientCategory) -> Self {
        Self {
            id: id.into(),
            client_category,
            phone: None,
            first_name: None,
            last_name: None,
            honorific: None,
            org_name: None,
            zip_code: None,
            language: Language::default(),
            platform: Platform::Web,
            external_user_id: None,
            is_push_notifications_enabled: false,
            is_appointments_reminder_enabled: true,
            is_todo_notifications_enabled: true,
            first_logged_in_at: None,
            avatar: None,
        }
    }

    /// Build the record that results from applying `update` on top of
    /// `existing` (or on top of defaults when there is no record yet).
    ///
    /// Only fields present in the update overwrite; everything else keeps
    /// its prior value.
    pub fn merge(existing: Option<&ClientSettings>, update: &ClientSettingsUpdate) -> Self {
        let mut merged = match existing {
            Some(current) => current.clone(),
            None => ClientSettings::new(
                update.id.clone(),
                update.client_category.unwrap_or(ClientCategory::Member),
            ),
        };

        if let Some(category) = update.client_category {
            merged.client_category = category;
        }
        overwrite(&mut merged.phone, &update.phone);
        overwrite(&mut merged.first_name, &update.first_name);
        overwrite(&mut merged.last_name, &update.last_name);
        overwrite(&mut merged.honorific, &update.honorific);
        overwrite(&mut merged.org_name, &update.org_name);
        overwrite(&mut merged.zip_code, &update.zip_code);
        overwrite(&mut merged.external_user_id, &update.external_user_id);
        overwrite(&mut merged.avatar, &update.avatar);
        if let Some(language) = update.language {
            merged.language = language;
        }
        if let Some(platform) = update.platform {
            merged.platform = platform;
        }
        if let Some(enabled) = update.is_push_notifications_enabled {
            merged.is_push_notifications_enabled = enabled;
        }
        if let Some(enabled) = update.is_appointments_reminder_enabled {
            merged.is_appointments_reminder_enabled = enabled;
        }
        if let Some(enabled) = update.is_todo_notifications_enabled {
            merged.is_todo_notifications_enabled = enabled;
        }
        if update.first_logged_in_at.is_some() {
            merged.first_logged_in_at = update.first_logged_in_at;
        }
        merged
    }

    /// Whether a push notification can actually reach this client.
    pub fn can_receive_push(&self) -> bool {
        self.platform.is_mobile()
            && self.is_push_notifications_enabled
            && self.external_user_id.is_some()
    }

    /// "First Last", falling back to whichever part is known.
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn overwrite(target: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

// ---------------------------------------------------------------------------
// ClientSettingsUpdate
// ---------------------------------------------------------------------------

/// Payload of an `updateClientSettings` message. Absent fields are left
/// untouched on the stored record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettingsUpdate {
    #[validate(length(min = 1))]
    pub id: ClientId,
    pub client_category: Option<ClientCategory>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub honorific: Option<String>,
    pub org_name: Option<String>,
    pub zip_code: Option<String>,
    pub language: Option<Language>,
    pub platform: Option<Platform>,
    pub external_user_id: Option<String>,
    pub is_push_notifications_enabled: Option<bool>,
    pub is_appointments_reminder_enabled: Option<bool>,
    pub is_todo_notifications_enabled: Option<bool>,
    pub first_logged_in_at: Option<Timestamp>,
    pub avatar: Option<String>,
}
