//! Routes inbound queue messages to the stores and the dispatch engine.

use std::sync::Arc;

use iris_core::types::ClientId;

use crate::engine::{CreateOutcome, DispatchEngine};
use crate::messages::{parse_message, DeleteClientSettings, QueueMessage, UpdateSenderClientId};
use crate::store::{StoreError, Stores};

/// Result of handling one queue message.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    SettingsUpdated {
        client_id: ClientId,
    },
    SettingsDeleted {
        client_id: ClientId,
        /// Whether a settings record existed.
        existed: bool,
        /// Dispatches removed by the cascade.
        dispatches: usize,
        /// Triggers removed by the cascade.
        triggers: u64,
    },
    DispatchCreated(CreateOutcome),
    DispatchDeleted {
        dispatch_id: String,
        cancelled: bool,
    },
    SenderUpdated {
        recipient_client_id: ClientId,
        updated: u64,
    },
    /// Malformed or invalid; acknowledged without any effect.
    Dropped {
        reason: String,
    },
}

/// Single entry point for the queue consumer.
///
/// `Ok` means the message may be deleted from the queue. `Err` means a store
/// failed and the message should be redelivered.
#[derive(Clone)]
pub struct Conductor {
    engine: Arc<DispatchEngine>,
    stores: Stores,
}

impl Conductor {
    pub fn new(engine: Arc<DispatchEngine>, stores: Stores) -> Self {
        Self { engine, stores }
    }

    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    /// Parse a raw message body and handle it.
    pub async fn handle_raw(&self, body: &str) -> Result<Handled, StoreError> {
        match parse_message(body) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::warn!(error = %e, body, "Dropping unparseable message");
                Ok(Handled::Dropped {
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn handle(&self, message: QueueMessage) -> Result<Handled, StoreError> {
        tracing::debug!(kind = message.kind(), "Handling message");
        match message {
            QueueMessage::UpdateClientSettings(update) => {
                let settings = self.stores.settings.upsert(&update).await?;
                tracing::info!(client_id = %settings.id, "Client settings updated");
                Ok(Handled::SettingsUpdated {
                    client_id: settings.id,
                })
            }
            QueueMessage::DeleteClientSettings(request) => self.delete_client(request).await,
            QueueMessage::CreateDispatch(payload) => {
                let outcome = self.engine.create(&payload).await?;
                Ok(Handled::DispatchCreated(outcome))
            }
            QueueMessage::DeleteDispatch(request) => {
                let cancelled = self.engine.cancel(&request.dispatch_id).await?;
                Ok(Handled::DispatchDeleted {
                    dispatch_id: request.dispatch_id,
                    cancelled,
                })
            }
            QueueMessage::UpdateSenderClientId(UpdateSenderClientId {
                recipient_client_id,
                sender_client_id,
            }) => {
                let updated = self
                    .engine
                    .update_sender(&recipient_client_id, &sender_client_id)
                    .await?;
                Ok(Handled::SenderUpdated {
                    recipient_client_id,
                    updated,
                })
            }
        }
    }

    async fn delete_client(&self, request: DeleteClientSettings) -> Result<Handled, StoreError> {
        let DeleteClientSettings { id, hard } = request;

        let existed = self.stores.settings.delete(&id).await?;
        let dispatch_ids = self.stores.dispatches.delete_for_client(&id, hard).await?;
        let triggers = if dispatch_ids.is_empty() {
            0
        } else {
            self.stores.triggers.delete_many(&dispatch_ids).await?
        };

        tracing::info!(
            client_id = %id,
            hard,
            existed,
            dispatches = dispatch_ids.len(),
            triggers,
            "Client settings deleted"
        );
        Ok(Handled::SettingsDeleted {
            client_id: id,
            existed,
            dispatches: dispatch_ids.len(),
            triggers,
        })
    }
}
