mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use iris_conductor::gateway::{
    CancelPush, ChatMessage, ProviderError, ProviderGateway, PushNotification, SmsMessage,
};
use iris_conductor::store::{
    ClientSettingsStore, DispatchStore, MemoryStore, Record, StoreError, Stores,
};
use iris_conductor::{CreateOutcome, DispatchEngine, FireOutcome, SkipReason};
use iris_core::client::ClientSettingsUpdate;
use iris_core::content::ContentKey;
use iris_core::dispatch::{
    DispatchStatus, FailureKind, NotificationType, Provider, ProviderResult,
};
use iris_core::policy::Refusal;

use common::*;

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn immediate_new_member_is_sent_by_sms() {
    let h = harness();
    h.save(web_member()).await;

    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();
    assert_matches!(
        outcome,
        CreateOutcome::Fired { ref dispatch_id, outcome: FireOutcome::Sent(ref result) } => {
            assert_eq!(dispatch_id, "newMember_m1");
            assert_eq!(result.provider, Provider::Twilio);
        }
    );

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows.len(), 1);
    let dispatch = &rows[0];
    assert_eq!(dispatch.status, DispatchStatus::Done);
    assert!(dispatch.sent_at.is_some());
    assert_eq!(
        dispatch.provider_result.as_ref().map(|r| r.provider),
        Some(Provider::Twilio)
    );

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_matches!(&sent[0], Sent::Sms(sms) => {
        assert_eq!(sms.to, "+15550001111");
        assert_eq!(
            sms.body,
            format!(
                "Hello Ada, welcome to Acme Health! Your coach is ready for you. \
                 Download the app to get started: {DOWNLOAD_LINK}"
            )
        );
        assert_eq!(sms.org_name.as_deref(), Some("Acme Health"));
    });
}

#[tokio::test]
async fn future_dispatch_is_scheduled_without_sending() {
    let h = harness();
    h.save(web_member()).await;
    let at = in_one_hour();

    let outcome = h
        .engine
        .create(&scheduled(new_member_dispatch(), at))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CreateOutcome::Scheduled {
            dispatch_id: "newMember_m1".into(),
            triggers_at: at,
        }
    );

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows[0].status, DispatchStatus::Received);
    assert_eq!(rows[0].triggers_at, Some(at));

    let trigger = h.stores.triggers.find("newMember_m1").await.unwrap().unwrap();
    assert_eq!(trigger.expire_at, at);
    assert_eq!(rows[0].triggered_id.as_deref(), Some(trigger.id.as_str()));
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn past_trigger_time_fires_immediately() {
    let h = harness();
    h.save(web_member()).await;
    let past = Utc::now() - chrono::Duration::minutes(5);

    let outcome = h
        .engine
        .create(&scheduled(new_member_dispatch(), past))
        .await
        .unwrap();
    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(_), .. });
    assert_eq!(h.store.trigger_count().await, 0);
}

#[tokio::test]
async fn redelivered_creation_never_resends() {
    let h = harness();
    h.save(web_member()).await;

    h.engine.create(&new_member_dispatch()).await.unwrap();
    let again = h.engine.create(&new_member_dispatch()).await.unwrap();

    assert_eq!(
        again,
        CreateOutcome::AlreadyProcessed {
            dispatch_id: "newMember_m1".into(),
            status: DispatchStatus::Done,
        }
    );
    assert_eq!(h.gateway.call_count(), 1);
    assert_eq!(h.store.dispatch_rows("newMember_m1").await.len(), 1);
}

#[tokio::test]
async fn recreating_a_pending_dispatch_overwrites_it() {
    let h = harness();
    h.save(web_member()).await;
    let first = in_one_hour();
    let second = first + chrono::Duration::hours(1);

    h.engine
        .create(&scheduled(new_member_dispatch(), first))
        .await
        .unwrap();
    let mut payload = scheduled(new_member_dispatch(), second);
    payload.correlation_id = Some("corr-2".into());
    h.engine.create(&payload).await.unwrap();

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].triggers_at, Some(second));
    assert_eq!(rows[0].correlation_id.as_deref(), Some("corr-2"));

    let trigger = h.stores.triggers.find("newMember_m1").await.unwrap().unwrap();
    assert_eq!(trigger.expire_at, second);
    assert_eq!(h.store.trigger_count().await, 1);
}

#[tokio::test]
async fn rescheduling_as_immediate_drops_the_stale_trigger() {
    let h = harness();
    h.save(web_member()).await;

    h.engine
        .create(&scheduled(new_member_dispatch(), in_one_hour()))
        .await
        .unwrap();
    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(_), .. });
    assert_eq!(h.store.trigger_count().await, 0);
}

#[tokio::test]
async fn caller_supplied_id_is_kept() {
    let h = harness();
    h.save(web_member()).await;
    let mut payload = new_member_dispatch();
    payload.dispatch_id = Some("custom-1".into());

    h.engine.create(&payload).await.unwrap();

    assert_eq!(h.store.dispatch_rows("custom-1").await.len(), 1);
    assert!(h.store.dispatch_rows("newMember_m1").await.is_empty());
}

// ---------------------------------------------------------------------------
// Delivery policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn video_to_web_member_is_refused() {
    let h = harness();
    h.save(web_member()).await;
    h.save(coach("u1")).await;
    let mut payload = create(ContentKey::CallOrVideo, NotificationType::Video, "m1");
    payload.sender_client_id = Some("u1".into());
    payload.content.peer_id = Some("peer-1".into());

    let outcome = h.engine.create(&payload).await.unwrap();

    assert_matches!(
        outcome,
        CreateOutcome::Fired {
            outcome: FireOutcome::Refused(Refusal::PlatformIneligible(NotificationType::Video)),
            ..
        }
    );
    let rows = h.store.dispatch_rows("callOrVideo_m1").await;
    assert_eq!(rows[0].status, DispatchStatus::Error);
    assert_eq!(rows[0].retry_count, 0);
    assert_eq!(rows[0].failure_reasons.len(), 1);
    assert_eq!(rows[0].failure_reasons[0].kind, FailureKind::Refused);
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn unknown_recipient_is_refused() {
    let h = harness();

    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(
        outcome,
        CreateOutcome::Fired {
            outcome: FireOutcome::Refused(Refusal::RecipientUnknown(ref id)),
            ..
        } if id == "m1"
    );
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn disabled_reminders_are_refused() {
    let h = harness();
    h.save(ClientSettingsUpdate {
        is_appointments_reminder_enabled: Some(false),
        ..web_member()
    })
    .await;
    h.save(coach("u1")).await;
    let mut payload = create(ContentKey::AppointmentReminder, NotificationType::Text, "m1");
    payload.sender_client_id = Some("u1".into());
    payload.content.appointment_time = Some(in_one_hour());

    let outcome = h.engine.create(&payload).await.unwrap();

    assert_matches!(
        outcome,
        CreateOutcome::Fired { outcome: FireOutcome::Refused(Refusal::AppointmentRemindersDisabled), .. }
    );
}

#[tokio::test]
async fn ios_video_call_rings_through_push() {
    let h = harness();
    h.save(mobile_member()).await;
    h.save(coach("u1")).await;
    let mut payload = create(ContentKey::CallOrVideo, NotificationType::Video, "m1");
    payload.sender_client_id = Some("u1".into());
    payload.content.peer_id = Some("peer-1".into());

    let outcome = h.engine.create(&payload).await.unwrap();

    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(ref r), .. } => {
        assert_eq!(r.provider, Provider::OneSignal);
    });
    assert_matches!(&h.gateway.sent()[0], Sent::Push(push) => {
        assert_eq!(push.external_user_id, "ext-m1");
        assert_eq!(push.body, "Grace is calling you.");
        let call = push.call.as_ref().unwrap();
        assert_eq!(call.peer_id, "peer-1");
        assert!(call.is_video);
        assert_eq!(push.data["dispatchId"], "callOrVideo_m1");
    });
}

#[tokio::test]
async fn text_goes_to_chat_when_a_channel_exists() {
    let h = harness();
    h.save(mobile_member()).await;
    h.save(coach("u1")).await;
    let mut payload = create(ContentKey::NewChatMessageFromUser, NotificationType::Chat, "m1");
    payload.sender_client_id = Some("u1".into());
    payload.content.send_bird_channel_url = Some("channel-1".into());

    h.engine.create(&payload).await.unwrap();

    assert_matches!(&h.gateway.sent()[0], Sent::Chat(chat) => {
        assert_eq!(chat.channel_url, "channel-1");
        assert_eq!(chat.sender_id, "u1");
        assert_eq!(chat.body, "You have a new message from Grace.");
    });
    let rows = h.store.dispatch_rows("newChatMessageFromUser_m1").await;
    assert_eq!(
        rows[0].provider_result.as_ref().map(|r| r.provider),
        Some(Provider::Sendbird)
    );
}

#[tokio::test]
async fn text_without_channel_prefers_push() {
    let h = harness();
    h.save(mobile_member()).await;

    h.engine
        .create(&create(ContentKey::LogReminder, NotificationType::Text, "m1"))
        .await
        .unwrap();

    assert_matches!(&h.gateway.sent()[0], Sent::Push(push) => {
        assert_eq!(push.external_user_id, "ext-m1");
        assert_eq!(push.heading.as_deref(), Some("Acme Health"));
        assert!(push.call.is_none());
    });
}

#[tokio::test]
async fn cancel_type_withdraws_the_push() {
    let h = harness();
    h.save(mobile_member()).await;
    let mut payload = create(ContentKey::CancelNotify, NotificationType::CancelVideo, "m1");
    payload.content.peer_id = Some("peer-1".into());

    h.engine.create(&payload).await.unwrap();

    assert_matches!(&h.gateway.sent()[0], Sent::CancelPush(cancel) => {
        assert_eq!(cancel.external_user_id, "ext-m1");
        assert_eq!(cancel.notification_type, NotificationType::CancelVideo);
    });
}

#[tokio::test]
async fn renders_in_the_recipient_language() {
    let h = harness();
    h.save(spanish_member()).await;

    h.engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(&h.gateway.sent()[0], Sent::Sms(sms) => {
        assert!(sms.body.starts_with("Hola Ada, ¡bienvenido a Acme Health!"));
    });
}

// ---------------------------------------------------------------------------
// Firing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fire_skips_missing_and_finished_dispatches() {
    let h = harness();
    h.save(web_member()).await;

    assert_eq!(
        h.engine.fire("nope").await.unwrap(),
        FireOutcome::Skipped(SkipReason::NotFound)
    );

    h.engine.create(&new_member_dispatch()).await.unwrap();
    assert_eq!(
        h.engine.fire("newMember_m1").await.unwrap(),
        FireOutcome::Skipped(SkipReason::NotReceived(DispatchStatus::Done))
    );
    assert_eq!(h.gateway.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fires_send_once() {
    let h = harness();
    h.save(web_member()).await;
    h.engine
        .create(&scheduled(new_member_dispatch(), in_one_hour()))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.fire("newMember_m1").await.unwrap() })
        })
        .collect();
    let mut sent = 0;
    for handle in handles {
        match handle.await.unwrap() {
            FireOutcome::Sent(_) => sent += 1,
            other => assert_matches!(other, FireOutcome::Skipped(_)),
        }
    }

    assert_eq!(sent, 1);
    assert_eq!(h.gateway.call_count(), 1);
}

#[tokio::test]
async fn provider_failure_rearms_with_backoff() {
    let h = harness();
    h.save(web_member()).await;
    h.gateway.fail_next(1);
    let before = Utc::now();

    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();

    let triggers_at = assert_matches!(
        outcome,
        CreateOutcome::Fired {
            outcome: FireOutcome::RetryScheduled { retry_count: 1, triggers_at },
            ..
        } => triggers_at
    );
    assert!(triggers_at >= before + chrono::Duration::seconds(60));

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows[0].status, DispatchStatus::Received);
    assert_eq!(rows[0].retry_count, 1);
    assert_eq!(rows[0].failure_reasons[0].kind, FailureKind::Provider);
    assert!(rows[0].failure_reasons[0].message.contains("503"));

    let trigger = h.stores.triggers.find("newMember_m1").await.unwrap().unwrap();
    assert_eq!(trigger.expire_at, triggers_at);
    assert_eq!(rows[0].triggered_id.as_deref(), Some(trigger.id.as_str()));
}

// ---------------------------------------------------------------------------
// Store failures and removal mid-send
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_error_after_claim_hands_the_dispatch_back() {
    let h = harness();
    h.save(web_member()).await;
    h.settings.fail_next(1);

    let err = h.engine.create(&new_member_dispatch()).await.unwrap_err();
    assert_matches!(err, StoreError::Database(_));

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows[0].status, DispatchStatus::Received);
    assert_eq!(h.gateway.call_count(), 0);

    // Redelivery of the same message sends it.
    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();
    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(_), .. });
    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DispatchStatus::Done);
    assert_eq!(h.gateway.sent().len(), 1);
}

/// Gateway that removes the dispatch while its send is in flight.
struct RemovingGateway {
    store: Arc<MemoryStore>,
    hard_delete: bool,
    accept: bool,
}

#[async_trait]
impl ProviderGateway for RemovingGateway {
    async fn send_sms(&self, _: &SmsMessage) -> Result<ProviderResult, ProviderError> {
        if self.hard_delete {
            DispatchStore::delete_for_client(&*self.store, "m1", true)
                .await
                .unwrap();
        } else {
            DispatchStore::cancel(&*self.store, "newMember_m1").await.unwrap();
        }
        if self.accept {
            Ok(ProviderResult {
                provider: Provider::Twilio,
                id: "SM1".into(),
            })
        } else {
            Err(ProviderError::HttpStatus {
                provider: Provider::Twilio,
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    async fn send_push(&self, _: &PushNotification) -> Result<ProviderResult, ProviderError> {
        Err(ProviderError::InvalidRequest("unexpected push".into()))
    }

    async fn send_chat(&self, _: &ChatMessage) -> Result<ProviderResult, ProviderError> {
        Err(ProviderError::InvalidRequest("unexpected chat".into()))
    }

    async fn cancel_push(&self, _: &CancelPush) -> Result<ProviderResult, ProviderError> {
        Err(ProviderError::InvalidRequest("unexpected cancel".into()))
    }
}

async fn removing_engine(hard_delete: bool, accept: bool) -> (Arc<MemoryStore>, DispatchEngine) {
    let store = Arc::new(MemoryStore::new());
    ClientSettingsStore::upsert(&*store, &web_member())
        .await
        .unwrap();
    let gateway = RemovingGateway {
        store: store.clone(),
        hard_delete,
        accept,
    };
    let engine = DispatchEngine::new(
        Stores::memory(store.clone()),
        Arc::new(gateway),
        dispatch_config(),
    );
    (store, engine)
}

#[tokio::test]
async fn failed_send_of_a_cancelled_dispatch_is_not_rearmed() {
    let (store, engine) = removing_engine(false, false).await;

    let outcome = engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(
        outcome,
        CreateOutcome::Fired { outcome: FireOutcome::Skipped(SkipReason::Deleted), .. }
    );
    assert_eq!(store.trigger_count().await, 0);
    let rows = store.dispatch_rows("newMember_m1").await;
    assert!(rows[0].deleted);
    assert_eq!(rows[0].retry_count, 0);
}

#[tokio::test]
async fn send_is_reported_even_when_the_row_vanished() {
    let (store, engine) = removing_engine(true, true).await;

    let outcome = engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(_), .. });
    assert!(store.dispatch_rows("newMember_m1").await.is_empty());
    assert_eq!(store.trigger_count().await, 0);
}

// ---------------------------------------------------------------------------
// Cancellation and sender reassignment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_a_scheduled_dispatch_removes_it() {
    let h = harness();
    h.save(web_member()).await;
    h.engine
        .create(&scheduled(new_member_dispatch(), in_one_hour()))
        .await
        .unwrap();

    assert!(h.engine.cancel("newMember_m1").await.unwrap());

    assert_eq!(h.store.trigger_count().await, 0);
    assert_matches!(
        h.stores.dispatches.find("newMember_m1").await.unwrap(),
        Some(Record::Deleted(_))
    );
    assert_eq!(
        h.engine.fire("newMember_m1").await.unwrap(),
        FireOutcome::Skipped(SkipReason::Deleted)
    );
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn cancelling_a_delivered_dispatch_is_a_no_op() {
    let h = harness();
    h.save(web_member()).await;
    h.engine.create(&new_member_dispatch()).await.unwrap();

    assert!(!h.engine.cancel("newMember_m1").await.unwrap());

    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert!(!rows[0].deleted);
    assert_eq!(rows[0].status, DispatchStatus::Done);
}

#[tokio::test]
async fn dispatch_id_is_reusable_after_cancellation() {
    let h = harness();
    h.save(web_member()).await;
    h.engine
        .create(&scheduled(new_member_dispatch(), in_one_hour()))
        .await
        .unwrap();
    h.engine.cancel("newMember_m1").await.unwrap();

    let outcome = h.engine.create(&new_member_dispatch()).await.unwrap();

    assert_matches!(outcome, CreateOutcome::Fired { outcome: FireOutcome::Sent(_), .. });
    let rows = h.store.dispatch_rows("newMember_m1").await;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].deleted);
    assert_eq!(rows[1].status, DispatchStatus::Done);
}

#[tokio::test]
async fn sender_update_skips_delivered_dispatches() {
    let h = harness();
    h.save(web_member()).await;
    h.save(coach("u1")).await;

    let mut delivered = create(ContentKey::NewMemberNudge, NotificationType::Text, "m1");
    delivered.sender_client_id = Some("u1".into());
    h.engine.create(&delivered).await.unwrap();

    let mut pending = create(ContentKey::AppointmentReminder, NotificationType::Text, "m1");
    pending.sender_client_id = Some("u1".into());
    pending.content.appointment_time = Some(in_one_hour());
    h.engine
        .create(&scheduled(pending, in_one_hour()))
        .await
        .unwrap();

    let updated = h
        .engine
        .update_sender(&"m1".to_string(), &"u2".to_string())
        .await
        .unwrap();

    assert_eq!(updated, 1);
    let delivered = h.store.dispatch_rows("newMemberNudge_m1").await;
    assert_eq!(delivered[0].status, DispatchStatus::Done);
    assert_eq!(delivered[0].sender_client_id.as_deref(), Some("u1"));
    let pending = h.store.dispatch_rows("appointmentReminder_m1").await;
    assert_eq!(pending[0].sender_client_id.as_deref(), Some("u2"));
}
