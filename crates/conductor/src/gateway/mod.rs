//! Outbound transport providers.
//!
//! [`ProviderGateway`] is the seam between the dispatch engine and the
//! outside world. [`HttpProviderGateway`] routes each channel to its HTTP
//! provider: SMS to Twilio, push and push cancellation to OneSignal, chat to
//! SendBird.

use std::time::Duration;

use async_trait::async_trait;
use iris_core::client::Platform;
use iris_core::dispatch::{NotificationType, Provider, ProviderResult};
use serde::{Deserialize, Serialize};

pub mod one_signal;
pub mod send_bird;
pub mod twilio;

pub use one_signal::{OneSignalConfig, OneSignalProvider};
pub use send_bird::{SendBirdConfig, SendBirdProvider};
pub use twilio::{TwilioConfig, TwilioProvider};

/// HTTP request timeout for a single provider call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Transport failures. All of these are treated as retryable by the engine.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} returned HTTP {status}: {body}")]
    HttpStatus {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(Provider),

    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse { provider: Provider, message: String },

    #[error("Invalid provider request: {0}")]
    InvalidRequest(String),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
    /// Shown as the sender prefix when present.
    pub org_name: Option<String>,
}

/// One ICE/TURN server handed to the callee for a VoIP session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Call-session metadata for video and voice calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInvite {
    pub peer_id: String,
    pub is_video: bool,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub external_user_id: String,
    pub platform: Platform,
    pub heading: Option<String>,
    pub body: String,
    /// Extra data delivered to the app (dispatch id, content key, path, ...).
    pub data: serde_json::Value,
    pub call: Option<CallInvite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub channel_url: String,
    pub sender_id: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Instruction for the app to withdraw an earlier call or text push.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelPush {
    pub external_user_id: String,
    pub platform: Platform,
    pub notification_type: NotificationType,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn send_sms(&self, message: &SmsMessage) -> Result<ProviderResult, ProviderError>;

    async fn send_push(&self, push: &PushNotification) -> Result<ProviderResult, ProviderError>;

    async fn send_chat(&self, message: &ChatMessage) -> Result<ProviderResult, ProviderError>;

    async fn cancel_push(&self, cancel: &CancelPush) -> Result<ProviderResult, ProviderError>;
}

// ---------------------------------------------------------------------------
// HttpProviderGateway
// ---------------------------------------------------------------------------

/// Production gateway. A provider left unconfigured fails its sends with
/// [`ProviderError::NotConfigured`].
pub struct HttpProviderGateway {
    twilio: Option<TwilioProvider>,
    one_signal: Option<OneSignalProvider>,
    send_bird: Option<SendBirdProvider>,
}

impl HttpProviderGateway {
    pub fn new(
        twilio: Option<TwilioProvider>,
        one_signal: Option<OneSignalProvider>,
        send_bird: Option<SendBirdProvider>,
    ) -> Self {
        Self {
            twilio,
            one_signal,
            send_bird,
        }
    }

    /// Build every provider whose environment variables are present.
    pub fn from_env() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let twilio = TwilioConfig::from_env().map(|c| TwilioProvider::new(client.clone(), c));
        let one_signal =
            OneSignalConfig::from_env().map(|c| OneSignalProvider::new(client.clone(), c));
        let send_bird = SendBirdConfig::from_env().map(|c| SendBirdProvider::new(client, c));

        for (provider, configured) in [
            (Provider::Twilio, twilio.is_some()),
            (Provider::OneSignal, one_signal.is_some()),
            (Provider::Sendbird, send_bird.is_some()),
        ] {
            if !configured {
                tracing::warn!(%provider, "Provider not configured, sends through it will fail");
            }
        }

        Ok(Self::new(twilio, one_signal, send_bird))
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn send_sms(&self, message: &SmsMessage) -> Result<ProviderResult, ProviderError> {
        let twilio = self
            .twilio
            .as_ref()
            .ok_or(ProviderError::NotConfigured(Provider::Twilio))?;
        twilio.send(message).await
    }

    async fn send_push(&self, push: &PushNotification) -> Result<ProviderResult, ProviderError> {
        let one_signal = self
            .one_signal
            .as_ref()
            .ok_or(ProviderError::NotConfigured(Provider::OneSignal))?;
        one_signal.send(push).await
    }

    async fn send_chat(&self, message: &ChatMessage) -> Result<ProviderResult, ProviderError> {
        let send_bird = self
            .send_bird
            .as_ref()
            .ok_or(ProviderError::NotConfigured(Provider::Sendbird))?;
        send_bird.send(message).await
    }

    async fn cancel_push(&self, cancel: &CancelPush) -> Result<ProviderResult, ProviderError> {
        let one_signal = self
            .one_signal
            .as_ref()
            .ok_or(ProviderError::NotConfigured(Provider::OneSignal))?;
        one_signal.cancel(cancel).await
    }
}

/// Read a non-empty environment variable.
pub(crate) fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Turn a non-2xx response into [`ProviderError::HttpStatus`].
pub(crate) async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::HttpStatus {
        provider,
        status: status.as_u16(),
        body,
    })
}
