//! SendBird group-channel messages API (in-app chat).

use iris_core::dispatch::{Provider, ProviderResult};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_status, env_non_empty, ChatMessage, ProviderError};

/// SendBird credentials.
///
/// | Env Var              | Meaning            |
/// |----------------------|--------------------|
/// | `SENDBIRD_APP_ID`    | Application id     |
/// | `SENDBIRD_API_TOKEN` | Master API token   |
#[derive(Debug, Clone)]
pub struct SendBirdConfig {
    pub app_id: String,
    pub api_token: String,
}

impl SendBirdConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            app_id: env_non_empty("SENDBIRD_APP_ID")?,
            api_token: env_non_empty("SENDBIRD_API_TOKEN")?,
        })
    }

    fn base_url(&self) -> String {
        format!("https://api-{}.sendbird.com/v3", self.app_id)
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    message_id: Option<i64>,
}

pub struct SendBirdProvider {
    client: reqwest::Client,
    config: SendBirdConfig,
}

impl SendBirdProvider {
    pub fn new(client: reqwest::Client, config: SendBirdConfig) -> Self {
        Self { client, config }
    }

    pub async fn send(&self, message: &ChatMessage) -> Result<ProviderResult, ProviderError> {
        let url = format!(
            "{}/group_channels/{}/messages",
            self.config.base_url(),
            message.channel_url
        );
        let response = self
            .client
            .post(&url)
            .header("Api-Token", &self.config.api_token)
            .json(&message_body(message))
            .send()
            .await?;
        let parsed: MessageResponse = check_status(Provider::Sendbird, response)
            .await?
            .json()
            .await?;

        let id = parsed.message_id.ok_or_else(|| ProviderError::InvalidResponse {
            provider: Provider::Sendbird,
            message: "missing message_id".into(),
        })?;
        Ok(ProviderResult {
            provider: Provider::Sendbird,
            id: id.to_string(),
        })
    }
}

fn message_body(message: &ChatMessage) -> Value {
    json!({
        "message_type": "MESG",
        "user_id": message.sender_id,
        "message": message.body,
        "data": message.data.to_string(),
    })
}
