//! Store traits used by the engine and conductor.
//!
//! Every method is a single atomic operation against the backing store;
//! state transitions are conditional so concurrent callers cannot both win.
//! [`postgres`] backs production, [`memory`] backs tests and local runs.

use std::sync::Arc;

use async_trait::async_trait;
use iris_core::client::{ClientSettings, ClientSettingsUpdate};
use iris_core::dispatch::{
    Dispatch, FailureDisposition, FailureReason, NewDispatch, ProviderResult, Trigger,
};
use iris_core::error::CoreError;
use iris_core::types::Timestamp;
use iris_db::DbPool;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be mapped back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A concurrent writer changed the record between two steps of one
    /// operation. Redelivering the message resolves it.
    #[error("Concurrent modification of {0}")]
    Conflict(String),
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// A record that may have been soft-deleted.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<T> {
    Active(T),
    Deleted(T),
}

impl<T> Record<T> {
    pub fn into_inner(self) -> T {
        match self {
            Record::Active(value) | Record::Deleted(value) => value,
        }
    }
}

/// Result of a dispatch upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    /// Inserted, or refreshed while still `received`.
    Written(Dispatch),
    /// The active record has already been claimed or finished; untouched.
    AlreadyProcessed(Dispatch),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ClientSettingsStore: Send + Sync {
    async fn get(&self, client_id: &str) -> Result<Option<ClientSettings>, StoreError>;

    /// Merge `update` into the stored record, creating it if needed.
    async fn upsert(&self, update: &ClientSettingsUpdate) -> Result<ClientSettings, StoreError>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, client_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn upsert(&self, new: &NewDispatch) -> Result<Upserted, StoreError>;

    /// The active dispatch with this id, or the latest soft-deleted one.
    async fn find(&self, dispatch_id: &str) -> Result<Option<Record<Dispatch>>, StoreError>;

    /// `received -> acquired`. `None` when the dispatch is not claimable.
    async fn acquire(&self, dispatch_id: &str) -> Result<Option<Dispatch>, StoreError>;

    /// `acquired -> received`, making the dispatch claimable again.
    async fn release(&self, dispatch_id: &str) -> Result<bool, StoreError>;

    /// `acquired -> done`.
    async fn complete(
        &self,
        dispatch_id: &str,
        result: &ProviderResult,
        sent_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// `acquired -> error` for a policy refusal.
    async fn refuse(&self, dispatch_id: &str, reason: &FailureReason) -> Result<bool, StoreError>;

    /// Record a provider failure: back to `received` or terminal `error`.
    async fn fail(
        &self,
        dispatch_id: &str,
        reason: &FailureReason,
        disposition: &FailureDisposition,
    ) -> Result<bool, StoreError>;

    /// Soft-delete unless already `done`. Returns `true` if cancelled.
    async fn cancel(&self, dispatch_id: &str) -> Result<bool, StoreError>;

    /// Remove every dispatch where the client is recipient or sender,
    /// physically when `hard`. Returns the affected dispatch ids.
    async fn delete_for_client(&self, client_id: &str, hard: bool)
        -> Result<Vec<String>, StoreError>;

    /// Reassign the sender of every undelivered active dispatch of a recipient.
    async fn update_sender(
        &self,
        recipient_client_id: &str,
        sender_client_id: &str,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Insert or replace the trigger for `trigger.dispatch_id`.
    async fn arm(&self, trigger: &Trigger) -> Result<(), StoreError>;

    async fn find(&self, dispatch_id: &str) -> Result<Option<Trigger>, StoreError>;

    /// Triggers with `expire_at <= now`, oldest first.
    async fn due(&self, now: Timestamp, limit: usize) -> Result<Vec<Trigger>, StoreError>;

    /// Delete the trigger only if it expires at or before `up_to`.
    async fn consume(&self, dispatch_id: &str, up_to: Timestamp) -> Result<bool, StoreError>;

    async fn delete(&self, dispatch_id: &str) -> Result<bool, StoreError>;

    async fn delete_many(&self, dispatch_ids: &[String]) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// The three stores the conductor works against.
#[derive(Clone)]
pub struct Stores {
    pub settings: Arc<dyn ClientSettingsStore>,
    pub dispatches: Arc<dyn DispatchStore>,
    pub triggers: Arc<dyn TriggerStore>,
}

impl Stores {
    pub fn postgres(pool: DbPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            settings: store.clone(),
            dispatches: store.clone(),
            triggers: store,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            settings: store.clone(),
            dispatches: store.clone(),
            triggers: store,
        }
    }
}
