//! OneSignal notifications API (push and push cancellation).
//!
//! Calls to iOS devices go through a separate VoIP app so they ring through
//! CallKit; everything else uses the main app.

use iris_core::client::Platform;
use iris_core::dispatch::{NotificationType, Provider, ProviderResult};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_status, env_non_empty, CancelPush, ProviderError, PushNotification};

const DEFAULT_BASE_URL: &str = "https://api.onesignal.com";

/// OneSignal credentials.
///
/// | Env Var                 | Meaning                           |
/// |-------------------------|-----------------------------------|
/// | `ONESIGNAL_APP_ID`      | Main app id                       |
/// | `ONESIGNAL_API_KEY`     | REST API key                      |
/// | `ONESIGNAL_VOIP_APP_ID` | iOS VoIP app id (optional)        |
#[derive(Debug, Clone)]
pub struct OneSignalConfig {
    pub app_id: String,
    pub api_key: String,
    pub voip_app_id: Option<String>,
    pub base_url: String,
}

impl OneSignalConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            app_id: env_non_empty("ONESIGNAL_APP_ID")?,
            api_key: env_non_empty("ONESIGNAL_API_KEY")?,
            voip_app_id: env_non_empty("ONESIGNAL_VOIP_APP_ID"),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NotificationResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    errors: Option<Value>,
}

pub struct OneSignalProvider {
    client: reqwest::Client,
    config: OneSignalConfig,
}

impl OneSignalProvider {
    pub fn new(client: reqwest::Client, config: OneSignalConfig) -> Self {
        Self { client, config }
    }

    pub async fn send(&self, push: &PushNotification) -> Result<ProviderResult, ProviderError> {
        let body = self.notification_body(push);
        self.post(&body).await
    }

    pub async fn cancel(&self, cancel: &CancelPush) -> Result<ProviderResult, ProviderError> {
        let body = self.cancel_body(cancel);
        self.post(&body).await
    }

    /// App id for a push: the VoIP app for iOS calls when one is configured.
    fn app_id(&self, platform: Platform, is_call: bool) -> &str {
        match (&self.config.voip_app_id, platform, is_call) {
            (Some(voip), Platform::Ios, true) => voip.as_str(),
            _ => self.config.app_id.as_str(),
        }
    }

    fn notification_body(&self, push: &PushNotification) -> Value {
        let mut data = push.data.clone();
        if let (Some(call), Value::Object(map)) = (&push.call, &mut data) {
            map.insert("peerId".into(), json!(call.peer_id));
            map.insert("isVideo".into(), json!(call.is_video));
            map.insert("iceServers".into(), json!(call.ice_servers));
        }

        let mut body = json!({
            "app_id": self.app_id(push.platform, push.call.is_some()),
            "target_channel": "push",
            "include_aliases": { "external_id": [push.external_user_id] },
            "contents": { "en": push.body },
            "data": data,
        });
        if let (Some(heading), Value::Object(map)) = (&push.heading, &mut body) {
            map.insert("headings".into(), json!({ "en": heading }));
        }
        if push.call.is_some() {
            if let Value::Object(map) = &mut body {
                map.insert("priority".into(), json!(10));
                if push.platform == Platform::Ios {
                    map.insert("apns_push_type_override".into(), json!("voip"));
                }
            }
        }
        body
    }

    /// A silent, data-only push the app interprets as "withdraw".
    fn cancel_body(&self, cancel: &CancelPush) -> Value {
        let is_call = cancel.notification_type != NotificationType::CancelText;
        let mut data = cancel.data.clone();
        if let Value::Object(map) = &mut data {
            map.insert("type".into(), json!(cancel.notification_type));
        }
        json!({
            "app_id": self.app_id(cancel.platform, is_call),
            "target_channel": "push",
            "include_aliases": { "external_id": [cancel.external_user_id] },
            "content_available": true,
            "data": data,
        })
    }

    async fn post(&self, body: &Value) -> Result<ProviderResult, ProviderError> {
        let response = self
            .client
            .post(format!("{}/notifications", self.config.base_url))
            .header("Authorization", format!("Key {}", self.config.api_key))
            .json(body)
            .send()
            .await?;
        let parsed: NotificationResponse = check_status(Provider::OneSignal, response)
            .await?
            .json()
            .await?;

        // OneSignal answers 200 with an empty id when no device matched.
        match parsed.id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(ProviderResult {
                provider: Provider::OneSignal,
                id,
            }),
            None => Err(ProviderError::InvalidResponse {
                provider: Provider::OneSignal,
                message: parsed
                    .errors
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "missing notification id".into()),
            }),
        }
    }
}
