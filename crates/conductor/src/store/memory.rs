//! In-memory stores for tests and local runs.
//!
//! All three stores share one state behind a single mutex, so each
//! operation is atomic the same way a conditional SQL statement is.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use iris_core::client::{ClientSettings, ClientSettingsUpdate};
use iris_core::dispatch::{
    Dispatch, DispatchStatus, FailureDisposition, FailureReason, NewDispatch, ProviderResult,
    Trigger,
};
use iris_core::types::Timestamp;
use tokio::sync::Mutex;

use super::{
    ClientSettingsStore, DispatchStore, Record, StoreError, TriggerStore, Upserted,
};

#[derive(Default)]
struct State {
    settings: HashMap<String, ClientSettings>,
    /// Every dispatch row ever written, soft-deleted ones included.
    dispatches: Vec<Dispatch>,
    triggers: HashMap<String, Trigger>,
}

impl State {
    fn active_mut(&mut self, dispatch_id: &str) -> Option<&mut Dispatch> {
        self.dispatches
            .iter_mut()
            .find(|d| d.dispatch_id == dispatch_id && !d.deleted)
    }

    fn acquired_mut(&mut self, dispatch_id: &str) -> Option<&mut Dispatch> {
        self.active_mut(dispatch_id)
            .filter(|d| d.status == DispatchStatus::Acquired)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every dispatch row with this id, oldest first.
    pub async fn dispatch_rows(&self, dispatch_id: &str) -> Vec<Dispatch> {
        let state = self.state.lock().await;
        state
            .dispatches
            .iter()
            .filter(|d| d.dispatch_id == dispatch_id)
            .cloned()
            .collect()
    }

    pub async fn trigger_count(&self) -> usize {
        self.state.lock().await.triggers.len()
    }
}

#[async_trait]
impl ClientSettingsStore for MemoryStore {
    async fn get(&self, client_id: &str) -> Result<Option<ClientSettings>, StoreError> {
        Ok(self.state.lock().await.settings.get(client_id).cloned())
    }

    async fn upsert(&self, update: &ClientSettingsUpdate) -> Result<ClientSettings, StoreError> {
        let mut state = self.state.lock().await;
        let merged = ClientSettings::merge(state.settings.get(&update.id), update);
        state.settings.insert(merged.id.clone(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, client_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.settings.remove(client_id).is_some())
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn upsert(&self, new: &NewDispatch) -> Result<Upserted, StoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        match state.active_mut(&new.dispatch_id) {
            Some(existing) if existing.status == DispatchStatus::Received => {
                existing.refresh(new, now);
                Ok(Upserted::Written(existing.clone()))
            }
            Some(existing) => Ok(Upserted::AlreadyProcessed(existing.clone())),
            None => {
                let dispatch = Dispatch::received(new, now);
                state.dispatches.push(dispatch.clone());
                Ok(Upserted::Written(dispatch))
            }
        }
    }

    async fn find(&self, dispatch_id: &str) -> Result<Option<Record<Dispatch>>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .dispatches
            .iter()
            .rev()
            .filter(|d| d.dispatch_id == dispatch_id);
        let record = match rows.clone().find(|d| !d.deleted) {
            Some(active) => Some(Record::Active(active.clone())),
            None => rows.next().map(|deleted| Record::Deleted(deleted.clone())),
        };
        Ok(record)
    }

    async fn acquire(&self, dispatch_id: &str) -> Result<Option<Dispatch>, StoreError> {
        let mut state = self.state.lock().await;
        let claimed = state
            .active_mut(dispatch_id)
            .filter(|d| d.status == DispatchStatus::Received)
            .map(|d| {
                d.status = DispatchStatus::Acquired;
                d.updated_at = Utc::now();
                d.clone()
            });
        Ok(claimed)
    }

    async fn release(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(dispatch) = state.acquired_mut(dispatch_id) else {
            return Ok(false);
        };
        dispatch.status = DispatchStatus::Received;
        dispatch.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete(
        &self,
        dispatch_id: &str,
        result: &ProviderResult,
        sent_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        // A dispatch cancelled mid-send still records the send.
        let Some(dispatch) = state
            .dispatches
            .iter_mut()
            .rev()
            .find(|d| d.dispatch_id == dispatch_id && d.status == DispatchStatus::Acquired)
        else {
            return Ok(false);
        };
        dispatch.status = DispatchStatus::Done;
        dispatch.provider_result = Some(result.clone());
        dispatch.sent_at = Some(sent_at);
        dispatch.triggered_id = None;
        dispatch.updated_at = Utc::now();
        Ok(true)
    }

    async fn refuse(&self, dispatch_id: &str, reason: &FailureReason) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(dispatch) = state.acquired_mut(dispatch_id) else {
            return Ok(false);
        };
        dispatch.status = DispatchStatus::Error;
        dispatch.failure_reasons.push(reason.clone());
        dispatch.triggered_id = None;
        dispatch.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail(
        &self,
        dispatch_id: &str,
        reason: &FailureReason,
        disposition: &FailureDisposition,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(dispatch) = state.acquired_mut(dispatch_id) else {
            return Ok(false);
        };
        dispatch.retry_count += 1;
        dispatch.failure_reasons.push(reason.clone());
        dispatch.updated_at = Utc::now();
        match disposition {
            FailureDisposition::Retry {
                triggers_at,
                triggered_id,
            } => {
                dispatch.status = DispatchStatus::Received;
                dispatch.triggers_at = Some(*triggers_at);
                dispatch.triggered_id = Some(triggered_id.clone());
            }
            FailureDisposition::Exhausted => {
                dispatch.status = DispatchStatus::Error;
                dispatch.triggered_id = None;
            }
        }
        Ok(true)
    }

    async fn cancel(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(dispatch) = state
            .active_mut(dispatch_id)
            .filter(|d| d.status != DispatchStatus::Done)
        else {
            return Ok(false);
        };
        dispatch.deleted = true;
        dispatch.triggered_id = None;
        dispatch.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete_for_client(
        &self,
        client_id: &str,
        hard: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        let mut ids = Vec::new();
        if hard {
            state.dispatches.retain(|d| {
                if d.involves(client_id) {
                    ids.push(d.dispatch_id.clone());
                    false
                } else {
                    true
                }
            });
        } else {
            let now = Utc::now();
            for dispatch in state
                .dispatches
                .iter_mut()
                .filter(|d| !d.deleted && d.involves(client_id))
            {
                dispatch.deleted = true;
                dispatch.triggered_id = None;
                dispatch.updated_at = now;
                ids.push(dispatch.dispatch_id.clone());
            }
        }
        Ok(ids)
    }

    async fn update_sender(
        &self,
        recipient_client_id: &str,
        sender_client_id: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut updated = 0;
        for dispatch in state.dispatches.iter_mut().filter(|d| {
            d.recipient_client_id == recipient_client_id
                && !d.deleted
                && d.status != DispatchStatus::Done
        }) {
            dispatch.sender_client_id = Some(sender_client_id.to_string());
            dispatch.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn arm(&self, trigger: &Trigger) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .triggers
            .insert(trigger.dispatch_id.clone(), trigger.clone());
        Ok(())
    }

    async fn find(&self, dispatch_id: &str) -> Result<Option<Trigger>, StoreError> {
        Ok(self.state.lock().await.triggers.get(dispatch_id).cloned())
    }

    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<Trigger>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| t.expire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.expire_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn consume(&self, dispatch_id: &str, up_to: Timestamp) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let expired = state
            .triggers
            .get(dispatch_id)
            .is_some_and(|t| t.expire_at <= up_to);
        if expired {
            state.triggers.remove(dispatch_id);
        }
        Ok(expired)
    }

    async fn delete(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.triggers.remove(dispatch_id).is_some())
    }

    async fn delete_many(&self, dispatch_ids: &[String]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let removed = dispatch_ids
            .iter()
            .filter(|id| state.triggers.remove(id.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}
