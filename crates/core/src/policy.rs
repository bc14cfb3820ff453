//! Delivery eligibility rules and provider selection.
//!
//! [`plan_delivery`] is the single decision point between "a dispatch was
//! claimed" and "a provider is called": it either returns the channel and
//! rendered body to send, or a [`Refusal`] that the engine records as a
//! terminal error without contacting any provider.

use crate::client::ClientSettings;
use crate::content::{ContentCategory, ContentField, ContentKey, DeliveryRoute};
use crate::dispatch::{Dispatch, NotificationType};
use crate::render::{RenderError, TemplateContext};
use crate::types::ClientId;

/// Transport channel chosen for a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sms,
    Push,
    Chat,
    /// Withdraw an earlier push on the recipient's device.
    CancelPush,
}

/// A dispatch that passed every policy gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub channel: Channel,
    /// Phone number, push external user id or chat channel URL.
    pub address: String,
    pub body: String,
}

/// Business-policy reasons for not delivering. These are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error("No client settings for recipient {0}")]
    RecipientUnknown(ClientId),

    #[error("Platform web cannot receive {0} notifications")]
    PlatformIneligible(NotificationType),

    #[error("Recipient has push notifications disabled, cannot deliver {0}")]
    PushDisabled(NotificationType),

    #[error("Content {content_key} requires {field}")]
    MissingMetadata {
        content_key: ContentKey,
        field: ContentField,
    },

    #[error("Recipient disabled appointment reminders")]
    AppointmentRemindersDisabled,

    #[error("Recipient disabled todo notifications")]
    TodoNotificationsDisabled,

    #[error("Member already logged in, nudge {0} is obsolete")]
    AlreadyLoggedIn(ContentKey),

    #[error("Recipient cannot receive push notifications")]
    PushUnreachable,

    #[error("Recipient has no phone number")]
    NoPhone,

    #[error(transparent)]
    Render(#[from] RenderError),
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Apply the policy gates that do not depend on the chosen channel.
pub fn check_eligibility(dispatch: &Dispatch, recipient: &ClientSettings) -> Result<(), Refusal> {
    let kind = dispatch.notification_type;
    let key = dispatch.content_key;

    if (kind.is_call() || kind.is_cancel()) && !recipient.platform.is_mobile() {
        return Err(Refusal::PlatformIneligible(kind));
    }
    if kind.is_call() && !recipient.is_push_notifications_enabled {
        return Err(Refusal::PushDisabled(kind));
    }

    if kind.is_call() && !dispatch.content.has(ContentField::PeerId) {
        return Err(Refusal::MissingMetadata {
            content_key: key,
            field: ContentField::PeerId,
        });
    }
    let entry = key.entry();
    if let Some(field) = entry
        .required
        .iter()
        .copied()
        .find(|field| !dispatch.content.has(*field))
    {
        return Err(Refusal::MissingMetadata {
            content_key: key,
            field,
        });
    }

    if key.is_appointment_reminder() && !recipient.is_appointments_reminder_enabled {
        return Err(Refusal::AppointmentRemindersDisabled);
    }
    if entry.category == ContentCategory::Todo && !recipient.is_todo_notifications_enabled {
        return Err(Refusal::TodoNotificationsDisabled);
    }
    if key.is_login_nudge() && recipient.first_logged_in_at.is_some() {
        return Err(Refusal::AlreadyLoggedIn(key));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Choose the channel for an eligible dispatch.
///
/// | Case | Channel |
/// |------|---------|
/// | cancel types | cancel push |
/// | video / call | push |
/// | route `smsOnly` | SMS |
/// | route `pushOnly` | push (refused if unreachable) |
/// | chat channel and sender present | chat |
/// | `text` | push if reachable, else SMS |
/// | `textSms` / `chat` | SMS |
pub fn select_channel(dispatch: &Dispatch, recipient: &ClientSettings) -> Result<Channel, Refusal> {
    let kind = dispatch.notification_type;

    let channel = if kind.is_cancel() {
        Channel::CancelPush
    } else if kind.is_call() {
        Channel::Push
    } else {
        match dispatch.content_key.entry().route {
            DeliveryRoute::SmsOnly => Channel::Sms,
            DeliveryRoute::PushOnly => Channel::Push,
            DeliveryRoute::Standard => {
                let has_chat =
                    dispatch.content.chat_channel().is_some() && dispatch.sender_client_id.is_some();
                if has_chat {
                    Channel::Chat
                } else if kind == NotificationType::Text && recipient.can_receive_push() {
                    Channel::Push
                } else {
                    Channel::Sms
                }
            }
        }
    };

    match channel {
        Channel::Sms if recipient.phone.is_none() => Err(Refusal::NoPhone),
        Channel::Push if !recipient.can_receive_push() => Err(Refusal::PushUnreachable),
        Channel::CancelPush if recipient.external_user_id.is_none() => {
            Err(Refusal::PushUnreachable)
        }
        other => Ok(other),
    }
}

/// Run every gate, pick the channel and render the body.
///
/// `base` carries values that do not come from the dispatch or the clients
/// (for example the app download link).
pub fn plan_delivery(
    dispatch: &Dispatch,
    recipient: Option<&ClientSettings>,
    sender: Option<&ClientSettings>,
    base: TemplateContext,
) -> Result<DeliveryPlan, Refusal> {
    let recipient = recipient
        .ok_or_else(|| Refusal::RecipientUnknown(dispatch.recipient_client_id.clone()))?;

    check_eligibility(dispatch, recipient)?;
    let channel = select_channel(dispatch, recipient)?;
    let address = match channel {
        Channel::Sms => recipient.phone.clone().ok_or(Refusal::NoPhone)?,
        Channel::Push | Channel::CancelPush => recipient
            .external_user_id
            .clone()
            .ok_or(Refusal::PushUnreachable)?,
        Channel::Chat => dispatch
            .content
            .chat_channel()
            .map(str::to_string)
            .ok_or(Refusal::MissingMetadata {
                content_key: dispatch.content_key,
                field: ContentField::SendBirdChannelUrl,
            })?,
    };

    let mut context = base.with_client(recipient);
    if let Some(sender) = sender {
        context = context.with_client(sender);
    }
    let context = context.with_content(&dispatch.content);
    let template = dispatch.content_key.entry().template(recipient.language);
    let body = context.render(template)?;

    Ok(DeliveryPlan {
        channel,
        address,
        body,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::client::{ClientCategory, Platform};
    use crate::dispatch::{DispatchContent, NewDispatch};

    fn dispatch(kind: NotificationType, key: ContentKey) -> Dispatch {
        let new = NewDispatch {
            dispatch_id: "d1".into(),
            correlation_id: None,
            notification_type: kind,
            recipient_client_id: "m1".into(),
            sender_client_id: Some("u1".into()),
            content_key: key,
            content: DispatchContent::default(),
            triggers_at: None,
            triggered_id: None,
        };
        Dispatch::received(&new, Utc::now())
    }

    fn web_member() -> ClientSettings {
        let mut m = ClientSettings::new("m1", ClientCategory::Member);
        m.first_name = Some("Ada".into());
        m.org_name = Some("Acme".into());
        m.phone = Some("+15550001111".into());
        m
    }

    fn mobile_member() -> ClientSettings {
        let mut m = web_member();
        m.platform = Platform::Ios;
        m.is_push_notifications_enabled = true;
        m.external_user_id = Some("ext-m1".into());
        m
    }

    fn coach() -> ClientSettings {
        let mut u = ClientSettings::new("u1", ClientCategory::User);
        u.first_name = Some("Grace".into());
        u
    }

    #[test]
    fn video_to_web_is_refused() {
        let mut d = dispatch(NotificationType::Video, ContentKey::CallOrVideo);
        d.content.peer_id = Some("peer".into());
        assert_matches!(
            check_eligibility(&d, &web_member()),
            Err(Refusal::PlatformIneligible(NotificationType::Video))
        );
    }

    #[test]
    fn call_with_push_disabled_is_refused() {
        let mut d = dispatch(NotificationType::Call, ContentKey::CallOrVideo);
        d.content.peer_id = Some("peer".into());
        let mut m = mobile_member();
        m.is_push_notifications_enabled = false;
        assert_matches!(
            check_eligibility(&d, &m),
            Err(Refusal::PushDisabled(NotificationType::Call))
        );
    }

    #[test]
    fn call_without_peer_is_refused() {
        let d = dispatch(NotificationType::Video, ContentKey::CallOrVideo);
        assert_matches!(
            check_eligibility(&d, &mobile_member()),
            Err(Refusal::MissingMetadata {
                field: ContentField::PeerId,
                ..
            })
        );
    }

    #[test]
    fn schedule_request_without_link_is_refused() {
        let d = dispatch(NotificationType::Text, ContentKey::AppointmentRequest);
        let err = check_eligibility(&d, &web_member()).unwrap_err();
        assert_eq!(err.to_string(), "Content appointmentRequest requires scheduleLink");
    }

    #[test]
    fn preference_gates() {
        let mut m = web_member();
        m.is_appointments_reminder_enabled = false;
        m.is_todo_notifications_enabled = false;
        m.first_logged_in_at = Some(Utc::now());

        let mut reminder = dispatch(NotificationType::Text, ContentKey::AppointmentReminder);
        reminder.content.appointment_time = Some(Utc::now());
        assert_matches!(
            check_eligibility(&reminder, &m),
            Err(Refusal::AppointmentRemindersDisabled)
        );

        let todo = dispatch(NotificationType::Text, ContentKey::CreateTodo);
        assert_matches!(
            check_eligibility(&todo, &m),
            Err(Refusal::TodoNotificationsDisabled)
        );

        let nudge = dispatch(NotificationType::Text, ContentKey::NewMemberNudge);
        assert_matches!(check_eligibility(&nudge, &m), Err(Refusal::AlreadyLoggedIn(_)));
    }

    #[test]
    fn sms_only_ignores_chat_channel() {
        let mut d = dispatch(NotificationType::Text, ContentKey::NewMember);
        d.content.send_bird_channel_url = Some("channel-1".into());
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::Sms);
    }

    #[test]
    fn chat_channel_wins_for_standard_content() {
        let mut d = dispatch(NotificationType::Text, ContentKey::NewChatMessageFromUser);
        d.content.send_bird_channel_url = Some("channel-1".into());
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::Chat);
    }

    #[test]
    fn chat_without_channel_falls_back_to_sms() {
        let d = dispatch(NotificationType::Chat, ContentKey::NewChatMessageFromUser);
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::Sms);
    }

    #[test]
    fn text_prefers_push_when_reachable() {
        let d = dispatch(NotificationType::Text, ContentKey::NewChatMessageFromUser);
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::Push);
        assert_eq!(select_channel(&d, &web_member()).unwrap(), Channel::Sms);
    }

    #[test]
    fn push_only_content_refused_when_unreachable() {
        let d = dispatch(NotificationType::Text, ContentKey::AddCaregiverDetails);
        assert_matches!(select_channel(&d, &web_member()), Err(Refusal::PushUnreachable));
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::Push);
    }

    #[test]
    fn sms_without_phone_is_refused() {
        let d = dispatch(NotificationType::TextSms, ContentKey::LogReminder);
        let mut m = web_member();
        m.phone = None;
        assert_matches!(select_channel(&d, &m), Err(Refusal::NoPhone));
    }

    #[test]
    fn cancel_types_use_cancel_push() {
        let d = dispatch(NotificationType::CancelCall, ContentKey::CancelNotify);
        assert_eq!(select_channel(&d, &mobile_member()).unwrap(), Channel::CancelPush);
    }

    #[test]
    fn plan_renders_in_recipient_language() {
        let mut m = web_member();
        m.language = crate::client::Language::Es;
        let d = dispatch(NotificationType::Text, ContentKey::LogReminder);
        let plan = plan_delivery(&d, Some(&m), Some(&coach()), TemplateContext::new()).unwrap();
        assert_eq!(plan.channel, Channel::Sms);
        assert_eq!(plan.address, "+15550001111");
        assert!(plan.body.starts_with("Hola Ada"));
    }

    #[test]
    fn plan_without_recipient_is_refused() {
        let d = dispatch(NotificationType::Text, ContentKey::LogReminder);
        assert_matches!(
            plan_delivery(&d, None, None, TemplateContext::new()),
            Err(Refusal::RecipientUnknown(id)) if id == "m1"
        );
    }

    #[test]
    fn plan_with_unresolved_placeholder_is_refused() {
        let d = dispatch(NotificationType::Text, ContentKey::NewRegisteredMember);
        assert_matches!(
            plan_delivery(&d, Some(&web_member()), None, TemplateContext::new()),
            Err(Refusal::Render(_))
        );
    }
}
