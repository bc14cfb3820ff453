//! Twilio Messages API (SMS).

use iris_core::dispatch::{Provider, ProviderResult};
use serde::Deserialize;

use super::{check_status, env_non_empty, ProviderError, SmsMessage};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// Twilio credentials.
///
/// | Env Var              | Meaning                       |
/// |----------------------|-------------------------------|
/// | `TWILIO_ACCOUNT_SID` | Account SID (basic-auth user) |
/// | `TWILIO_AUTH_TOKEN`  | Auth token (basic-auth pass)  |
/// | `TWILIO_FROM`        | Sending phone number          |
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub base_url: String,
}

impl TwilioConfig {
    /// `None` unless all three variables are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: env_non_empty("TWILIO_ACCOUNT_SID")?,
            auth_token: env_non_empty("TWILIO_AUTH_TOKEN")?,
            from: env_non_empty("TWILIO_FROM")?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: Option<String>,
}

pub struct TwilioProvider {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioProvider {
    pub fn new(client: reqwest::Client, config: TwilioConfig) -> Self {
        Self { client, config }
    }

    pub async fn send(&self, message: &SmsMessage) -> Result<ProviderResult, ProviderError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url, self.config.account_sid
        );
        let body = sms_body(message);
        let form = [
            ("To", message.to.as_str()),
            ("From", self.config.from.as_str()),
            ("Body", body.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;
        let parsed: MessageResponse = check_status(Provider::Twilio, response)
            .await?
            .json()
            .await?;

        let sid = parsed.sid.ok_or_else(|| ProviderError::InvalidResponse {
            provider: Provider::Twilio,
            message: "missing message sid".into(),
        })?;
        tracing::debug!(sid = %sid, "Twilio accepted SMS");

        Ok(ProviderResult {
            provider: Provider::Twilio,
            id: sid,
        })
    }
}

/// The SMS text, prefixed with the organisation name when known.
fn sms_body(message: &SmsMessage) -> String {
    match message.org_name.as_deref().filter(|o| !o.is_empty()) {
        Some(org) => format!("{org}: {}", message.body),
        None => message.body.clone(),
    }
}
