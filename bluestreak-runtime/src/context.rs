//! Per-run workflow context.
//!
//! One context is built for each claimed run and bound to that run's
//! workflow id. It exposes the two durable operations handler code may use:
//! [`step`](WorkflowContext::step) for recorded side effects and
//! [`sleep`](WorkflowContext::sleep) for recorded pauses. Everything
//! non-deterministic or externally visible inside a handler must go through
//! `step`; code between steps is replayed verbatim on every run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use bluestreak_core::clock::Clock;
use bluestreak_persistence::WorkflowStore;

/// Handle given to handler code for durable steps and sleeps.
///
/// A small cloneable struct carrying the workflow id plus handles to the
/// store and clock; cloning it shares the same run.
#[derive(Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    timeout_interval: Duration,
}

impl WorkflowContext {
    pub(crate) fn new(
        workflow_id: String,
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        timeout_interval: Duration,
    ) -> Self {
        Self {
            workflow_id,
            store,
            clock,
            timeout_interval,
        }
    }

    /// The id of the workflow this context is bound to.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn lease_ms(&self) -> i64 {
        self.timeout_interval.as_millis() as i64
    }

    /// Run a recorded unit of work at-most-once per `step_id`.
    ///
    /// If an output is already recorded for `(workflow_id, step_id)` it is
    /// returned without invoking `f`. Otherwise `f` runs, its output is
    /// persisted (insert-only, so a concurrent duplicate cannot overwrite
    /// it), the worker's lease is refreshed, and the output is returned.
    ///
    /// Persisting and lease refresh are not atomic with `f`: a crash in
    /// between means the next replay re-runs `f`. External effects inside
    /// `f` must therefore tolerate at-least-once execution; at-most-once
    /// holds for the recorded output.
    ///
    /// A failing `f` propagates unchanged and records nothing.
    pub async fn step<T, F, Fut>(&self, step_id: &str, f: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(recorded) = self.store.find_step_output(&self.workflow_id, step_id).await? {
            debug!(workflow_id = %self.workflow_id, step_id, "step replayed from recorded output");
            return Ok(serde_json::from_value(recorded)?);
        }

        let output = f().await?;

        let recorded = serde_json::to_value(&output)?;
        self.store
            .put_step_output(&self.workflow_id, step_id, &recorded)
            .await?;
        self.store
            .extend_lease(&self.workflow_id, self.clock.now() + self.lease_ms())
            .await?;

        Ok(output)
    }

    /// Pause for `ms` milliseconds, durably.
    ///
    /// On first entry the wake instant `now + ms` is committed and the
    /// lease is pushed past it, so the claim loop cannot hand the sleeping
    /// workflow to another worker. A replay that finds the committed wake
    /// instant sleeps only for whatever remains of it (or not at all) and
    /// never rewrites the record or the lease.
    pub async fn sleep(&self, nap_id: &str, ms: u64) -> anyhow::Result<()> {
        match self.store.find_nap_wake(&self.workflow_id, nap_id).await? {
            Some(wake_up_at) => {
                let remaining = wake_up_at - self.clock.now();
                if remaining > 0 {
                    debug!(workflow_id = %self.workflow_id, nap_id, remaining, "resuming recorded nap");
                    tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
                }
            }
            None => {
                let wake_up_at = self.clock.now() + ms as i64;
                self.store
                    .put_nap_wake(&self.workflow_id, nap_id, wake_up_at)
                    .await?;
                self.store
                    .extend_lease(&self.workflow_id, wake_up_at + self.lease_ms())
                    .await?;
                debug!(workflow_id = %self.workflow_id, nap_id, wake_up_at, "nap committed");
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        Ok(())
    }
}
