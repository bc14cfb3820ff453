//! Scheduled dispatch firing.
//!
//! [`TriggerFirer`] runs as a background task, periodically collecting due
//! triggers and firing their dispatches through the engine.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use iris_core::dispatch::Trigger;
use iris_core::types::Timestamp;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::FirerConfig;
use crate::engine::DispatchEngine;
use crate::store::{StoreError, TriggerStore};

// ---------------------------------------------------------------------------
// TriggerFirer
// ---------------------------------------------------------------------------

pub struct TriggerFirer {
    engine: Arc<DispatchEngine>,
    triggers: Arc<dyn TriggerStore>,
    config: FirerConfig,
}

impl TriggerFirer {
    pub fn new(
        engine: Arc<DispatchEngine>,
        triggers: Arc<dyn TriggerStore>,
        config: FirerConfig,
    ) -> Self {
        Self {
            engine,
            triggers,
            config,
        }
    }

    /// Run the polling loop until `cancel` fires.
    ///
    /// A failed cycle is logged and the next tick tries again.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Trigger firer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Trigger firer cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.process_due(Utc::now()).await {
                        tracing::error!(error = %e, "Failed to load due triggers");
                    }
                }
            }
        }
    }

    /// Fire every trigger due at `now`, up to the batch size.
    ///
    /// Returns the number of triggers processed. Errors firing a single
    /// dispatch are logged, leave its trigger in place and do not stop the
    /// rest of the batch.
    pub async fn process_due(&self, now: Timestamp) -> Result<usize, StoreError> {
        let due = self.triggers.due(now, self.config.batch_size).await?;
        let count = due.len();

        stream::iter(due)
            .for_each_concurrent(self.config.concurrency, |trigger| async move {
                self.fire_one(trigger).await;
            })
            .await;

        if count > 0 {
            tracing::info!(count, "Processed due triggers");
        }
        Ok(count)
    }

    async fn fire_one(&self, trigger: Trigger) {
        match self.engine.fire(&trigger.dispatch_id).await {
            Ok(outcome) => {
                tracing::debug!(dispatch_id = %trigger.dispatch_id, ?outcome, "Trigger fired");
            }
            Err(e) => {
                // The trigger stays armed; the next cycle fires it again.
                tracing::error!(
                    dispatch_id = %trigger.dispatch_id,
                    error = %e,
                    "Failed to fire dispatch"
                );
                return;
            }
        }

        // Only this version of the trigger; a retry armed during the fire
        // expires later and stays.
        if let Err(e) = self
            .triggers
            .consume(&trigger.dispatch_id, trigger.expire_at)
            .await
        {
            tracing::error!(
                dispatch_id = %trigger.dispatch_id,
                error = %e,
                "Failed to delete fired trigger"
            );
        }
    }
}
