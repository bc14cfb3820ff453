//! Shared fixtures for conductor integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use iris_conductor::config::DispatchConfig;
use iris_conductor::gateway::{
    CancelPush, ChatMessage, ProviderError, ProviderGateway, PushNotification, SmsMessage,
};
use iris_conductor::store::{ClientSettingsStore, MemoryStore, StoreError, Stores};
use iris_conductor::{Conductor, DispatchEngine};
use iris_core::client::{
    ClientCategory, ClientSettings, ClientSettingsUpdate, Language, Platform,
};
use iris_core::content::ContentKey;
use iris_core::dispatch::{
    CreateDispatch, DispatchContent, NotificationType, Provider, ProviderResult,
};
use iris_core::types::Timestamp;

pub const DOWNLOAD_LINK: &str = "https://app.example/get";

// ---------------------------------------------------------------------------
// RecordingGateway
// ---------------------------------------------------------------------------

/// A provider call captured by [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Sms(SmsMessage),
    Push(PushNotification),
    Chat(ChatMessage),
    CancelPush(CancelPush),
}

/// Fake gateway that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<Sent>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl RecordingGateway {
    /// Fail the next `n` calls with an HTTP 503.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Every call attempted, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, provider: Provider, call: Sent) -> Result<ProviderResult, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::HttpStatus {
                provider,
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(call);
        Ok(ProviderResult {
            provider,
            id: format!("{provider}-{n}"),
        })
    }
}

#[async_trait]
impl ProviderGateway for RecordingGateway {
    async fn send_sms(&self, message: &SmsMessage) -> Result<ProviderResult, ProviderError> {
        self.record(Provider::Twilio, Sent::Sms(message.clone()))
    }

    async fn send_push(&self, push: &PushNotification) -> Result<ProviderResult, ProviderError> {
        self.record(Provider::OneSignal, Sent::Push(push.clone()))
    }

    async fn send_chat(&self, message: &ChatMessage) -> Result<ProviderResult, ProviderError> {
        self.record(Provider::Sendbird, Sent::Chat(message.clone()))
    }

    async fn cancel_push(&self, cancel: &CancelPush) -> Result<ProviderResult, ProviderError> {
        self.record(Provider::OneSignal, Sent::CancelPush(cancel.clone()))
    }
}

// ---------------------------------------------------------------------------
// FlakySettings
// ---------------------------------------------------------------------------

/// Settings store over the harness [`MemoryStore`] whose reads can be told
/// to fail as if the database were unreachable.
pub struct FlakySettings {
    inner: Arc<MemoryStore>,
    failures_left: AtomicUsize,
}

impl FlakySettings {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` reads with a pool timeout.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientSettingsStore for FlakySettings {
    async fn get(&self, client_id: &str) -> Result<Option<ClientSettings>, StoreError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        ClientSettingsStore::get(&*self.inner, client_id).await
    }

    async fn upsert(&self, update: &ClientSettingsUpdate) -> Result<ClientSettings, StoreError> {
        ClientSettingsStore::upsert(&*self.inner, update).await
    }

    async fn delete(&self, client_id: &str) -> Result<bool, StoreError> {
        ClientSettingsStore::delete(&*self.inner, client_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub settings: Arc<FlakySettings>,
    pub stores: Stores,
    pub gateway: Arc<RecordingGateway>,
    pub engine: Arc<DispatchEngine>,
    pub conductor: Conductor,
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        download_link: Some(DOWNLOAD_LINK.into()),
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(dispatch_config())
}

pub fn harness_with(config: DispatchConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let settings = Arc::new(FlakySettings::new(store.clone()));
    let stores = Stores {
        settings: settings.clone(),
        ..Stores::memory(store.clone())
    };
    let gateway = Arc::new(RecordingGateway::default());
    let engine = Arc::new(DispatchEngine::new(
        stores.clone(),
        gateway.clone(),
        config,
    ));
    let conductor = Conductor::new(engine.clone(), stores.clone());
    Harness {
        store,
        settings,
        stores,
        gateway,
        engine,
        conductor,
    }
}

impl Harness {
    pub async fn save(&self, update: ClientSettingsUpdate) {
        self.stores.settings.upsert(&update).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Web member `m1` reachable only by SMS.
pub fn web_member() -> ClientSettingsUpdate {
    ClientSettingsUpdate {
        id: "m1".into(),
        client_category: Some(ClientCategory::Member),
        phone: Some("+15550001111".into()),
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        org_name: Some("Acme Health".into()),
        platform: Some(Platform::Web),
        ..Default::default()
    }
}

/// iOS member `m1` with push enabled.
pub fn mobile_member() -> ClientSettingsUpdate {
    ClientSettingsUpdate {
        platform: Some(Platform::Ios),
        external_user_id: Some("ext-m1".into()),
        is_push_notifications_enabled: Some(true),
        ..web_member()
    }
}

pub fn spanish_member() -> ClientSettingsUpdate {
    ClientSettingsUpdate {
        language: Some(Language::Es),
        ..web_member()
    }
}

/// Coach `u1`.
pub fn coach(id: &str) -> ClientSettingsUpdate {
    ClientSettingsUpdate {
        id: id.into(),
        client_category: Some(ClientCategory::User),
        first_name: Some("Grace".into()),
        last_name: Some("Hopper".into()),
        honorific: Some("Dr.".into()),
        org_name: Some("Acme Health".into()),
        ..Default::default()
    }
}

pub fn create(
    content_key: ContentKey,
    notification_type: NotificationType,
    recipient: &str,
) -> CreateDispatch {
    CreateDispatch {
        dispatch_id: None,
        disambiguator: None,
        correlation_id: None,
        notification_type,
        recipient_client_id: recipient.into(),
        sender_client_id: None,
        content_key,
        triggers_at: None,
        content: DispatchContent::default(),
    }
}

pub fn new_member_dispatch() -> CreateDispatch {
    create(ContentKey::NewMember, NotificationType::Text, "m1")
}

pub fn scheduled(mut payload: CreateDispatch, at: Timestamp) -> CreateDispatch {
    payload.triggers_at = Some(at);
    payload
}

pub fn in_one_hour() -> Timestamp {
    Utc::now() + chrono::Duration::hours(1)
}
