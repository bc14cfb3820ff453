//! Postgres-backed stores delegating to the `iris-db` repositories.

use async_trait::async_trait;
use iris_core::client::{ClientSettings, ClientSettingsUpdate};
use iris_core::dispatch::{
    Dispatch, FailureDisposition, FailureReason, NewDispatch, ProviderResult, Trigger,
};
use iris_core::types::Timestamp;
use iris_db::repositories::{ClientSettingsRepo, DispatchRepo, TriggerRepo};
use iris_db::DbPool;

use super::{
    ClientSettingsStore, DispatchStore, Record, StoreError, TriggerStore, Upserted,
};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientSettingsStore for PgStore {
    async fn get(&self, client_id: &str) -> Result<Option<ClientSettings>, StoreError> {
        match ClientSettingsRepo::find_by_id(&self.pool, client_id).await? {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, update: &ClientSettingsUpdate) -> Result<ClientSettings, StoreError> {
        let row = ClientSettingsRepo::upsert(&self.pool, update).await?;
        Ok(row.try_into()?)
    }

    async fn delete(&self, client_id: &str) -> Result<bool, StoreError> {
        Ok(ClientSettingsRepo::delete(&self.pool, client_id).await?)
    }
}

#[async_trait]
impl DispatchStore for PgStore {
    async fn upsert(&self, new: &NewDispatch) -> Result<Upserted, StoreError> {
        if let Some(row) = DispatchRepo::upsert_received(&self.pool, new).await? {
            return Ok(Upserted::Written(row.try_into()?));
        }
        // The conflict update was skipped: an active row exists past `received`.
        match DispatchRepo::find_active(&self.pool, &new.dispatch_id).await? {
            Some(row) => Ok(Upserted::AlreadyProcessed(row.try_into()?)),
            None => Err(StoreError::Conflict(new.dispatch_id.clone())),
        }
    }

    async fn find(&self, dispatch_id: &str) -> Result<Option<Record<Dispatch>>, StoreError> {
        let Some(row) = DispatchRepo::find_latest(&self.pool, dispatch_id).await? else {
            return Ok(None);
        };
        let dispatch = Dispatch::try_from(row)?;
        Ok(Some(if dispatch.deleted {
            Record::Deleted(dispatch)
        } else {
            Record::Active(dispatch)
        }))
    }

    async fn acquire(&self, dispatch_id: &str) -> Result<Option<Dispatch>, StoreError> {
        match DispatchRepo::acquire(&self.pool, dispatch_id).await? {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn release(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        Ok(DispatchRepo::release(&self.pool, dispatch_id).await?)
    }

    async fn complete(
        &self,
        dispatch_id: &str,
        result: &ProviderResult,
        sent_at: Timestamp,
    ) -> Result<bool, StoreError> {
        Ok(DispatchRepo::complete(&self.pool, dispatch_id, result, sent_at).await?)
    }

    async fn refuse(&self, dispatch_id: &str, reason: &FailureReason) -> Result<bool, StoreError> {
        Ok(DispatchRepo::refuse(&self.pool, dispatch_id, reason).await?)
    }

    async fn fail(
        &self,
        dispatch_id: &str,
        reason: &FailureReason,
        disposition: &FailureDisposition,
    ) -> Result<bool, StoreError> {
        let updated = match disposition {
            FailureDisposition::Retry {
                triggers_at,
                triggered_id,
            } => {
                DispatchRepo::fail_and_rearm(
                    &self.pool,
                    dispatch_id,
                    reason,
                    *triggers_at,
                    triggered_id,
                )
                .await?
            }
            FailureDisposition::Exhausted => {
                DispatchRepo::fail_terminal(&self.pool, dispatch_id, reason).await?
            }
        };
        Ok(updated)
    }

    async fn cancel(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        Ok(DispatchRepo::soft_delete_undelivered(&self.pool, dispatch_id).await?)
    }

    async fn delete_for_client(
        &self,
        client_id: &str,
        hard: bool,
    ) -> Result<Vec<String>, StoreError> {
        let ids = if hard {
            DispatchRepo::hard_delete_for_client(&self.pool, client_id).await?
        } else {
            DispatchRepo::soft_delete_for_client(&self.pool, client_id).await?
        };
        Ok(ids)
    }

    async fn update_sender(
        &self,
        recipient_client_id: &str,
        sender_client_id: &str,
    ) -> Result<u64, StoreError> {
        Ok(DispatchRepo::update_sender(&self.pool, recipient_client_id, sender_client_id).await?)
    }
}

#[async_trait]
impl TriggerStore for PgStore {
    async fn arm(&self, trigger: &Trigger) -> Result<(), StoreError> {
        TriggerRepo::arm(&self.pool, trigger).await?;
        Ok(())
    }

    async fn find(&self, dispatch_id: &str) -> Result<Option<Trigger>, StoreError> {
        Ok(TriggerRepo::find_by_dispatch_id(&self.pool, dispatch_id)
            .await?
            .map(Trigger::from))
    }

    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<Trigger>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = TriggerRepo::list_due(&self.pool, now, limit).await?;
        Ok(rows.into_iter().map(Trigger::from).collect())
    }

    async fn consume(&self, dispatch_id: &str, up_to: Timestamp) -> Result<bool, StoreError> {
        Ok(TriggerRepo::consume(&self.pool, dispatch_id, up_to).await?)
    }

    async fn delete(&self, dispatch_id: &str) -> Result<bool, StoreError> {
        Ok(TriggerRepo::delete(&self.pool, dispatch_id).await?)
    }

    async fn delete_many(&self, dispatch_ids: &[String]) -> Result<u64, StoreError> {
        Ok(TriggerRepo::delete_many(&self.pool, dispatch_ids).await?)
    }
}
