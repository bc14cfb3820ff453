//! Dispatch and trigger domain types.
//!
//! A [`Dispatch`] is one logical outbound notification. Its id is derived
//! deterministically from the content key and recipient so a redelivered
//! creation event lands on the same record instead of producing a second
//! notification.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::content::{ContentField, ContentKey};
use crate::types::{ClientId, Timestamp};

define_str_enum! {
    /// Lifecycle state of a dispatch. Soft deletion is tracked separately by
    /// the `deleted` flag.
    DispatchStatus ("dispatch status") {
        /// Persisted and not yet sent (immediate, scheduled or awaiting retry).
        Received = "received",
        /// Claimed by a firing path, about to send.
        Acquired = "acquired",
        Done = "done",
        Error = "error",
    }
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchStatus::Done | DispatchStatus::Error)
    }
}

define_str_enum! {
    /// How a notification is presented to the recipient.
    NotificationType ("notification type") {
        Video = "video",
        Call = "call",
        Text = "text",
        TextSms = "textSms",
        Chat = "chat",
        CancelVideo = "cancelVideo",
        CancelCall = "cancelCall",
        CancelText = "cancelText",
    }
}

impl NotificationType {
    /// Voice and video calls ring the recipient's device.
    pub fn is_call(self) -> bool {
        matches!(self, NotificationType::Video | NotificationType::Call)
    }

    /// Withdrawals of an earlier call or text push.
    pub fn is_cancel(self) -> bool {
        matches!(
            self,
            NotificationType::CancelVideo | NotificationType::CancelCall | NotificationType::CancelText
        )
    }
}

define_str_enum! {
    /// Transport provider that accepted a notification.
    Provider ("provider") {
        Twilio = "twilio",
        OneSignal = "oneSignal",
        Sendbird = "sendbird",
    }
}

/// Proof of send: the provider and the provider-side message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: Provider,
    pub id: String,
}

define_str_enum! {
    /// Why an attempt did not deliver.
    FailureKind ("failure kind") {
        /// Delivery policy refused the dispatch; terminal.
        Refused = "refused",
        /// The provider call failed; retryable up to the ceiling.
        Provider = "provider",
    }
}

/// One entry of a dispatch's ordered failure history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
    pub occurred_at: Timestamp,
}

impl FailureReason {
    pub fn refused(message: impl Into<String>, occurred_at: Timestamp) -> Self {
        Self {
            kind: FailureKind::Refused,
            message: message.into(),
            occurred_at,
        }
    }

    pub fn provider(message: impl Into<String>, occurred_at: Timestamp) -> Self {
        Self {
            kind: FailureKind::Provider,
            message: message.into(),
            occurred_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Content-specific fields carried by a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_link: Option<String>,
    /// Deep-link path opened by the mobile app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_bird_channel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_image_download_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_audio_download_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_score: Option<String>,
}

impl DispatchContent {
    /// Whether `field` carries a non-empty value.
    pub fn has(&self, field: ContentField) -> bool {
        let text = match field {
            ContentField::AppointmentTime => return self.appointment_time.is_some(),
            ContentField::Content => &self.content,
            ContentField::PeerId => &self.peer_id,
            ContentField::AppointmentId => &self.appointment_id,
            ContentField::ScheduleLink => &self.schedule_link,
            ContentField::Path => &self.path,
            ContentField::SendBirdChannelUrl => &self.send_bird_channel_url,
            ContentField::JournalImageDownloadLink => &self.journal_image_download_link,
            ContentField::JournalAudioDownloadLink => &self.journal_audio_download_link,
            ContentField::AssessmentName => &self.assessment_name,
            ContentField::AssessmentScore => &self.assessment_score,
        };
        text.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// The chat channel for the recipient/sender pair, if one is established.
    pub fn chat_channel(&self) -> Option<&str> {
        self.send_bird_channel_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Dispatch id
// ---------------------------------------------------------------------------

/// Derive the deterministic dispatch id for a logical event.
///
/// The inputs are joined with `_` in the order content key, recipient,
/// disambiguator. Stored ids depend on this exact ordering.
///
/// ```
/// use iris_core::content::ContentKey;
/// use iris_core::dispatch::generate_dispatch_id;
///
/// assert_eq!(generate_dispatch_id(ContentKey::NewMember, "m1", None), "newMember_m1");
/// assert_eq!(
///     generate_dispatch_id(ContentKey::AppointmentReminder, "m1", Some("apt-9")),
///     "appointmentReminder_m1_apt-9"
/// );
/// ```
pub fn generate_dispatch_id(
    content_key: ContentKey,
    recipient_client_id: &str,
    disambiguator: Option<&str>,
) -> String {
    let mut id = format!("{}_{}", content_key.as_str(), recipient_client_id);
    if let Some(extra) = disambiguator.filter(|d| !d.is_empty()) {
        id.push('_');
        id.push_str(extra);
    }
    id
}

// ---------------------------------------------------------------------------
// CreateDispatch / NewDispatch / Dispatch
// ---------------------------------------------------------------------------

/// Payload of a `createDispatch` message.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDispatch {
    /// Caller-supplied id; derived with [`generate_dispatch_id`] when absent.
    #[validate(length(min = 1))]
    pub dispatch_id: Option<String>,
    /// Extra id component distinguishing repeated events of the same key for
    /// the same recipient (e.g. an appointment id).
    pub disambiguator: Option<String>,
    pub correlation_id: Option<String>,
    pub notification_type: NotificationType,
    #[validate(length(min = 1))]
    pub recipient_client_id: ClientId,
    #[validate(length(min = 1))]
    pub sender_client_id: Option<ClientId>,
    pub content_key: ContentKey,
    pub triggers_at: Option<Timestamp>,
    #[serde(flatten)]
    pub content: DispatchContent,
}

impl CreateDispatch {
    pub fn resolved_dispatch_id(&self) -> String {
        match &self.dispatch_id {
            Some(id) => id.clone(),
            None => generate_dispatch_id(
                self.content_key,
                &self.recipient_client_id,
                self.disambiguator.as_deref(),
            ),
        }
    }
}

/// Everything the dispatch store needs to insert or refresh a pending
/// dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDispatch {
    pub dispatch_id: String,
    pub correlation_id: Option<String>,
    pub notification_type: NotificationType,
    pub recipient_client_id: ClientId,
    pub sender_client_id: Option<ClientId>,
    pub content_key: ContentKey,
    pub content: DispatchContent,
    pub triggers_at: Option<Timestamp>,
    /// Id of the trigger armed for `triggers_at`, if any.
    pub triggered_id: Option<String>,
}

/// A stored dispatch record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub dispatch_id: String,
    pub correlation_id: Option<String>,
    pub notification_type: NotificationType,
    pub recipient_client_id: ClientId,
    pub sender_client_id: Option<ClientId>,
    pub content_key: ContentKey,
    pub content: DispatchContent,
    pub triggers_at: Option<Timestamp>,
    pub triggered_id: Option<String>,
    pub status: DispatchStatus,
    pub provider_result: Option<ProviderResult>,
    pub sent_at: Option<Timestamp>,
    pub retry_count: i32,
    pub failure_reasons: Vec<FailureReason>,
    pub deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Dispatch {
    /// A freshly received dispatch built from `new` at time `now`.
    pub fn received(new: &NewDispatch, now: Timestamp) -> Self {
        Self {
            dispatch_id: new.dispatch_id.clone(),
            correlation_id: new.correlation_id.clone(),
            notification_type: new.notification_type,
            recipient_client_id: new.recipient_client_id.clone(),
            sender_client_id: new.sender_client_id.clone(),
            content_key: new.content_key,
            content: new.content.clone(),
            triggers_at: new.triggers_at,
            triggered_id: new.triggered_id.clone(),
            status: DispatchStatus::Received,
            provider_result: None,
            sent_at: None,
            retry_count: 0,
            failure_reasons: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the payload fields with `new`, keeping lifecycle state.
    pub fn refresh(&mut self, new: &NewDispatch, now: Timestamp) {
        self.correlation_id.clone_from(&new.correlation_id);
        self.notification_type = new.notification_type;
        self.recipient_client_id.clone_from(&new.recipient_client_id);
        self.sender_client_id.clone_from(&new.sender_client_id);
        self.content_key = new.content_key;
        self.content = new.content.clone();
        self.triggers_at = new.triggers_at;
        self.triggered_id.clone_from(&new.triggered_id);
        self.updated_at = now;
    }

    /// Whether `client_id` is the recipient or the sender.
    pub fn involves(&self, client_id: &str) -> bool {
        self.recipient_client_id == client_id || self.sender_client_id.as_deref() == Some(client_id)
    }
}

/// Pending wake-up for a scheduled dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: String,
    pub dispatch_id: String,
    pub expire_at: Timestamp,
}

/// Where a failed dispatch goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to `received`, re-armed with a new trigger.
    Retry { triggers_at: Timestamp, triggered_id: String },
    /// Terminal `error`.
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_json(extra: &str) -> String {
        format!(
            r#"{{"notificationType":"text","recipientClientId":"m1","contentKey":"newMember"{extra}}}"#
        )
    }

    #[test]
    fn dispatch_id_is_derived_when_absent() {
        let payload: CreateDispatch = serde_json::from_str(&create_json("")).unwrap();
        assert_eq!(payload.resolved_dispatch_id(), "newMember_m1");
    }

    #[test]
    fn caller_supplied_dispatch_id_wins() {
        let payload: CreateDispatch =
            serde_json::from_str(&create_json(r#","dispatchId":"custom-1""#)).unwrap();
        assert_eq!(payload.resolved_dispatch_id(), "custom-1");
    }

    #[test]
    fn disambiguator_is_appended() {
        let payload: CreateDispatch =
            serde_json::from_str(&create_json(r#","disambiguator":"apt-1""#)).unwrap();
        assert_eq!(payload.resolved_dispatch_id(), "newMember_m1_apt-1");
    }

    #[test]
    fn flattened_content_fields_are_read() {
        let payload: CreateDispatch = serde_json::from_str(&create_json(
            r#","scheduleLink":"https://s.example/x","triggersAt":"2030-01-01T10:00:00Z""#,
        ))
        .unwrap();
        assert!(payload.content.has(ContentField::ScheduleLink));
        assert!(!payload.content.has(ContentField::PeerId));
        assert!(payload.triggers_at.is_some());
    }

    #[test]
    fn blank_fields_do_not_count_as_present() {
        let content = DispatchContent {
            content: Some("  ".into()),
            send_bird_channel_url: Some(String::new()),
            ..Default::default()
        };
        assert!(!content.has(ContentField::Content));
        assert!(content.chat_channel().is_none());
    }

    #[test]
    fn empty_recipient_fails_validation() {
        let payload: CreateDispatch = serde_json::from_str(
            r#"{"notificationType":"text","recipientClientId":"","contentKey":"newMember"}"#,
        )
        .unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(DispatchStatus::Done.is_terminal());
        assert!(DispatchStatus::Error.is_terminal());
        assert!(!DispatchStatus::Received.is_terminal());
        assert!(!DispatchStatus::Acquired.is_terminal());
    }

    #[test]
    fn notification_type_groups() {
        assert!(NotificationType::Video.is_call());
        assert!(!NotificationType::CancelVideo.is_call());
        assert!(NotificationType::CancelText.is_cancel());
        assert_eq!("textSms".parse::<NotificationType>().unwrap(), NotificationType::TextSms);
    }
}
