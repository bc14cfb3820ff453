//! The dispatch state machine.
//!
//! ```text
//! received --acquire--> acquired --send ok--> done
//!    ^                      |
//!    +---- retry re-arm ----+--refused / retries exhausted--> error
//! ```
//!
//! `deleted` is a separate flag set by cancellation or client deletion and
//! excludes a dispatch from any further processing.

use std::sync::Arc;

use chrono::Utc;
use iris_core::client::ClientSettings;
use iris_core::dispatch::{
    CreateDispatch, Dispatch, DispatchStatus, FailureDisposition, FailureReason, NewDispatch,
    NotificationType, ProviderResult, Trigger,
};
use iris_core::policy::{plan_delivery, Channel, DeliveryPlan, Refusal};
use iris_core::render::TemplateContext;
use iris_core::types::{ClientId, Timestamp};
use serde_json::{json, Value};

use crate::config::DispatchConfig;
use crate::gateway::{
    CallInvite, CancelPush, ChatMessage, ProviderError, ProviderGateway, PushNotification,
    SmsMessage,
};
use crate::store::{Record, StoreError, Stores, Upserted};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What `create` did with a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Persisted with a future trigger; nothing sent yet.
    Scheduled {
        dispatch_id: String,
        triggers_at: Timestamp,
    },
    /// Persisted and fired synchronously.
    Fired {
        dispatch_id: String,
        outcome: FireOutcome,
    },
    /// The dispatch was already claimed or finished; left untouched.
    AlreadyProcessed {
        dispatch_id: String,
        status: DispatchStatus,
    },
}

/// What `fire` did with a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Sent(ProviderResult),
    Refused(Refusal),
    RetryScheduled {
        retry_count: i32,
        triggers_at: Timestamp,
    },
    /// Provider failure with no retries left.
    Failed { retry_count: i32 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Deleted,
    NotReceived(DispatchStatus),
    /// Another firing path claimed the dispatch first.
    LostClaim,
}

/// Result of the checks run on a claimed dispatch before sending.
enum Prepared {
    Ready {
        recipient: ClientSettings,
        plan: DeliveryPlan,
    },
    Refused(Refusal),
}

// ---------------------------------------------------------------------------
// DispatchEngine
// ---------------------------------------------------------------------------

pub struct DispatchEngine {
    stores: Stores,
    gateway: Arc<dyn ProviderGateway>,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(stores: Stores, gateway: Arc<dyn ProviderGateway>, config: DispatchConfig) -> Self {
        Self {
            stores,
            gateway,
            config,
        }
    }

    /// Persist a dispatch and either schedule it or fire it right away.
    ///
    /// Re-creating a dispatch that is still `received` overwrites it in
    /// place; one that has moved past `received` is reported as
    /// [`CreateOutcome::AlreadyProcessed`] and never sent again.
    pub async fn create(&self, payload: &CreateDispatch) -> Result<CreateOutcome, StoreError> {
        let now = Utc::now();
        let dispatch_id = payload.resolved_dispatch_id();
        let schedule = payload
            .triggers_at
            .filter(|at| *at > now)
            .map(|at| (at, uuid::Uuid::new_v4().to_string()));

        let new = NewDispatch {
            dispatch_id: dispatch_id.clone(),
            correlation_id: payload.correlation_id.clone(),
            notification_type: payload.notification_type,
            recipient_client_id: payload.recipient_client_id.clone(),
            sender_client_id: payload.sender_client_id.clone(),
            content_key: payload.content_key,
            content: payload.content.clone(),
            triggers_at: payload.triggers_at,
            triggered_id: schedule.as_ref().map(|(_, id)| id.clone()),
        };

        if let Upserted::AlreadyProcessed(existing) = self.stores.dispatches.upsert(&new).await? {
            tracing::info!(
                dispatch_id = %dispatch_id,
                status = %existing.status,
                "Dispatch already processed, ignoring re-creation"
            );
            return Ok(CreateOutcome::AlreadyProcessed {
                dispatch_id,
                status: existing.status,
            });
        }

        match schedule {
            Some((triggers_at, trigger_id)) => {
                let trigger = Trigger {
                    id: trigger_id,
                    dispatch_id: dispatch_id.clone(),
                    expire_at: triggers_at,
                };
                self.stores.triggers.arm(&trigger).await?;
                tracing::info!(dispatch_id = %dispatch_id, %triggers_at, "Dispatch scheduled");
                Ok(CreateOutcome::Scheduled {
                    dispatch_id,
                    triggers_at,
                })
            }
            None => {
                // A previously scheduled version may have left a trigger behind.
                self.stores.triggers.delete(&dispatch_id).await?;
                let outcome = self.fire(&dispatch_id).await?;
                Ok(CreateOutcome::Fired {
                    dispatch_id,
                    outcome,
                })
            }
        }
    }

    /// Claim a `received` dispatch, apply delivery policy, send and record
    /// the outcome. Safe to call repeatedly and concurrently: only the path
    /// that wins the claim sends.
    ///
    /// A store error after the claim and before the outcome is recorded hands
    /// the claim back before it is returned, so a redelivered message or the
    /// still armed trigger can fire the dispatch again. The due trigger is
    /// consumed only once the outcome is recorded.
    pub async fn fire(&self, dispatch_id: &str) -> Result<FireOutcome, StoreError> {
        match self.stores.dispatches.find(dispatch_id).await? {
            None => return Ok(FireOutcome::Skipped(SkipReason::NotFound)),
            Some(Record::Deleted(_)) => return Ok(FireOutcome::Skipped(SkipReason::Deleted)),
            Some(Record::Active(d)) if d.status != DispatchStatus::Received => {
                return Ok(FireOutcome::Skipped(SkipReason::NotReceived(d.status)));
            }
            Some(Record::Active(_)) => {}
        }

        let Some(dispatch) = self.stores.dispatches.acquire(dispatch_id).await? else {
            tracing::debug!(dispatch_id, "Dispatch claimed by another path");
            return Ok(FireOutcome::Skipped(SkipReason::LostClaim));
        };

        let now = Utc::now();
        let (recipient, plan) = match self.prepare(&dispatch, now).await {
            Ok(Prepared::Ready { recipient, plan }) => (recipient, plan),
            Ok(Prepared::Refused(refusal)) => return Ok(FireOutcome::Refused(refusal)),
            Err(e) => return Err(self.release_claim(dispatch_id, e).await),
        };

        let outcome = match self.deliver(&dispatch, &recipient, &plan).await {
            Ok(result) => {
                let recorded = self
                    .stores
                    .dispatches
                    .complete(dispatch_id, &result, Utc::now())
                    .await?;
                if recorded {
                    tracing::info!(
                        dispatch_id,
                        provider = %result.provider,
                        provider_message_id = %result.id,
                        "Dispatch sent"
                    );
                } else {
                    tracing::warn!(
                        dispatch_id,
                        provider = %result.provider,
                        provider_message_id = %result.id,
                        "Dispatch sent but no claimed row was left to record it"
                    );
                }
                FireOutcome::Sent(result)
            }
            Err(e) => match self.record_failure(&dispatch, e, now).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.release_claim(dispatch_id, e).await),
            },
        };

        // Only the trigger that was due; a retry armed above expires later.
        self.stores.triggers.consume(dispatch_id, now).await?;
        Ok(outcome)
    }

    /// Soft-delete an undelivered dispatch and drop its trigger.
    ///
    /// Returns `false` when there was nothing to cancel (missing, already
    /// deleted or already `done`).
    pub async fn cancel(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        let cancelled = self.stores.dispatches.cancel(dispatch_id).await?;
        if cancelled {
            self.stores.triggers.delete(dispatch_id).await?;
            tracing::info!(dispatch_id, "Dispatch cancelled");
        } else {
            tracing::debug!(dispatch_id, "Nothing to cancel");
        }
        Ok(cancelled)
    }

    /// Reassign the sender on every undelivered dispatch of a recipient.
    pub async fn update_sender(
        &self,
        recipient_client_id: &ClientId,
        sender_client_id: &ClientId,
    ) -> Result<u64, StoreError> {
        let updated = self
            .stores
            .dispatches
            .update_sender(recipient_client_id, sender_client_id)
            .await?;
        tracing::info!(
            recipient_client_id = %recipient_client_id,
            sender_client_id = %sender_client_id,
            updated,
            "Dispatch senders updated"
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn base_context(&self) -> TemplateContext {
        let context = TemplateContext::new();
        match &self.config.download_link {
            Some(link) => context.with_value("downloadLink", link.as_str()),
            None => context,
        }
    }

    /// Everything between the claim and the provider call. Only the
    /// refusal path writes dispatch state.
    async fn prepare(&self, dispatch: &Dispatch, now: Timestamp) -> Result<Prepared, StoreError> {
        let recipient = self
            .stores
            .settings
            .get(&dispatch.recipient_client_id)
            .await?;
        let sender = match &dispatch.sender_client_id {
            Some(id) => self.stores.settings.get(id).await?,
            None => None,
        };

        let Some(recipient) = recipient else {
            let refusal = Refusal::RecipientUnknown(dispatch.recipient_client_id.clone());
            return self.refuse(dispatch, refusal, now).await;
        };
        match plan_delivery(dispatch, Some(&recipient), sender.as_ref(), self.base_context()) {
            Ok(plan) => Ok(Prepared::Ready { recipient, plan }),
            Err(refusal) => self.refuse(dispatch, refusal, now).await,
        }
    }

    /// Put a claimed dispatch back to `received` and return `error`.
    async fn release_claim(&self, dispatch_id: &str, error: StoreError) -> StoreError {
        match self.stores.dispatches.release(dispatch_id).await {
            Ok(true) => {
                tracing::warn!(
                    dispatch_id,
                    error = %error,
                    "Dispatch claim released after store error"
                );
            }
            Ok(false) => {
                tracing::debug!(
                    dispatch_id,
                    error = %error,
                    "Dispatch no longer claimed, nothing to release"
                );
            }
            Err(release_error) => {
                tracing::error!(
                    dispatch_id,
                    error = %error,
                    release_error = %release_error,
                    "Failed to release dispatch claim"
                );
            }
        }
        error
    }

    async fn refuse(
        &self,
        dispatch: &Dispatch,
        refusal: Refusal,
        now: Timestamp,
    ) -> Result<Prepared, StoreError> {
        tracing::warn!(
            dispatch_id = %dispatch.dispatch_id,
            content_key = %dispatch.content_key,
            reason = %refusal,
            "Dispatch refused"
        );
        let reason = FailureReason::refused(refusal.to_string(), now);
        self.stores
            .dispatches
            .refuse(&dispatch.dispatch_id, &reason)
            .await?;
        self.stores
            .triggers
            .consume(&dispatch.dispatch_id, now)
            .await?;
        Ok(Prepared::Refused(refusal))
    }

    async fn record_failure(
        &self,
        dispatch: &Dispatch,
        error: ProviderError,
        now: Timestamp,
    ) -> Result<FireOutcome, StoreError> {
        let dispatch_id = dispatch.dispatch_id.as_str();
        let retry_count = dispatch.retry_count + 1;
        let reason = FailureReason::provider(error.to_string(), now);
        let policy = &self.config.retry;

        if policy.is_exhausted(retry_count) {
            let recorded = self
                .stores
                .dispatches
                .fail(dispatch_id, &reason, &FailureDisposition::Exhausted)
                .await?;
            if !recorded {
                tracing::debug!(
                    dispatch_id,
                    error = %error,
                    "Failed dispatch was removed mid-send"
                );
                return Ok(FireOutcome::Skipped(SkipReason::Deleted));
            }
            tracing::error!(
                dispatch_id,
                retry_count,
                error = %error,
                "Dispatch failed, retries exhausted"
            );
            return Ok(FireOutcome::Failed { retry_count });
        }

        let triggers_at = policy.next_attempt_at(now, retry_count);
        let trigger = Trigger {
            id: uuid::Uuid::new_v4().to_string(),
            dispatch_id: dispatch_id.to_string(),
            expire_at: triggers_at,
        };
        let disposition = FailureDisposition::Retry {
            triggers_at,
            triggered_id: trigger.id.clone(),
        };
        let recorded = self
            .stores
            .dispatches
            .fail(dispatch_id, &reason, &disposition)
            .await?;
        if !recorded {
            tracing::debug!(
                dispatch_id,
                error = %error,
                "Failed dispatch was removed mid-send, not retrying"
            );
            return Ok(FireOutcome::Skipped(SkipReason::Deleted));
        }
        self.stores.triggers.arm(&trigger).await?;
        tracing::warn!(
            dispatch_id,
            retry_count,
            %triggers_at,
            error = %error,
            "Dispatch send failed, retry scheduled"
        );
        Ok(FireOutcome::RetryScheduled {
            retry_count,
            triggers_at,
        })
    }

    async fn deliver(
        &self,
        dispatch: &Dispatch,
        recipient: &ClientSettings,
        plan: &DeliveryPlan,
    ) -> Result<ProviderResult, ProviderError> {
        let data = push_data(dispatch);
        match plan.channel {
            Channel::Sms => {
                let message = SmsMessage {
                    to: plan.address.clone(),
                    body: plan.body.clone(),
                    org_name: recipient.org_name.clone(),
                };
                self.gateway.send_sms(&message).await
            }
            Channel::Push => {
                let call = dispatch
                    .notification_type
                    .is_call()
                    .then(|| CallInvite {
                        peer_id: dispatch.content.peer_id.clone().unwrap_or_default(),
                        is_video: dispatch.notification_type == NotificationType::Video,
                        ice_servers: self.config.ice_servers.clone(),
                    });
                let push = PushNotification {
                    external_user_id: plan.address.clone(),
                    platform: recipient.platform,
                    heading: recipient.org_name.clone(),
                    body: plan.body.clone(),
                    data,
                    call,
                };
                self.gateway.send_push(&push).await
            }
            Channel::Chat => {
                let Some(sender_id) = dispatch.sender_client_id.clone() else {
                    return Err(ProviderError::InvalidRequest(
                        "chat message without a sender".into(),
                    ));
                };
                let message = ChatMessage {
                    channel_url: plan.address.clone(),
                    sender_id,
                    body: plan.body.clone(),
                    data,
                };
                self.gateway.send_chat(&message).await
            }
            Channel::CancelPush => {
                let cancel = CancelPush {
                    external_user_id: plan.address.clone(),
                    platform: recipient.platform,
                    notification_type: dispatch.notification_type,
                    data,
                };
                self.gateway.cancel_push(&cancel).await
            }
        }
    }
}

/// App-facing metadata sent alongside pushes and chat messages.
fn push_data(dispatch: &Dispatch) -> Value {
    let mut data = json!({
        "dispatchId": dispatch.dispatch_id,
        "contentKey": dispatch.content_key,
        "notificationType": dispatch.notification_type,
    });
    if let Value::Object(map) = &mut data {
        let content = &dispatch.content;
        for (key, value) in [
            ("path", &content.path),
            ("peerId", &content.peer_id),
            ("appointmentId", &content.appointment_id),
            ("senderClientId", &dispatch.sender_client_id),
        ] {
            if let Some(value) = value {
                map.insert(key.to_string(), json!(value));
            }
        }
    }
    data
}
