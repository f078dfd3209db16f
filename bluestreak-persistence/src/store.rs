//! The store gateway trait.
//!
//! One method per typed operation the engine performs against the document
//! store. All methods are async and fail with [`StoreError`] on backend
//! faults; `AlreadyExists` is reserved for unique-index collisions.

use async_trait::async_trait;
use serde_json::Value;

use bluestreak_core::clock::Timestamp;
use bluestreak_core::error::StoreError;
use bluestreak_core::instance::{RunData, StatusAndResult, WorkflowStatus};

/// Typed operations over the backing document store.
///
/// The engine holds this as `Arc<dyn WorkflowStore>`; implementations must
/// be safe to call from concurrently running workflow tasks.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a fresh instance: `status = idle`, `failures = 0`,
    /// `timeout_at = now` (claimable immediately).
    ///
    /// # Errors
    ///
    /// `StoreError::AlreadyExists` if the workflow id collides.
    async fn insert_instance(
        &self,
        workflow_id: &str,
        handler_id: &str,
        input: Value,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Atomically claim one due instance.
    ///
    /// Finds an instance with a claimable status and `timeout_at < now`,
    /// flips it to `running` with `timeout_at = new_timeout_at`, and
    /// returns its id. Returns `None` when nothing is due.
    ///
    /// This must be a single atomic conditional update: when two workers
    /// race over one due instance, exactly one of them receives it. Which
    /// candidate is picked among several is unspecified, but an instance
    /// whose `timeout_at` stays in the past must eventually be selected.
    async fn claim_due(
        &self,
        now: Timestamp,
        new_timeout_at: Timestamp,
    ) -> Result<Option<String>, StoreError>;

    /// Projection for the runner. `None` if the instance does not exist.
    async fn find_run_data(&self, workflow_id: &str) -> Result<Option<RunData>, StoreError>;

    /// Projection for `wait`. `None` if the instance does not exist.
    async fn find_status_and_result(
        &self,
        workflow_id: &str,
    ) -> Result<Option<StatusAndResult>, StoreError>;

    /// Transition to `finished` and record the result. Leaves `timeout_at`
    /// untouched; the status alone makes the instance unclaimable.
    ///
    /// A no-op when the instance is already terminal: a worker that
    /// outlived its lease cannot overwrite what a later claimant recorded.
    async fn mark_finished(&self, workflow_id: &str, result: Value) -> Result<(), StoreError>;

    /// Record a failed run: `status` is `failed` or `aborted`, the failure
    /// counter is replaced with `new_failures`, and `timeout_at` becomes
    /// the retry-not-before instant.
    ///
    /// A no-op when the instance is already terminal, like
    /// [`mark_finished`](WorkflowStore::mark_finished).
    async fn mark_failure(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        new_timeout_at: Timestamp,
        new_failures: u32,
    ) -> Result<(), StoreError>;

    /// Push the lease further into the future. Sets only `timeout_at`.
    async fn extend_lease(
        &self,
        workflow_id: &str,
        new_timeout_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// The recorded output of a step, if the step has completed before.
    async fn find_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Value>, StoreError>;

    /// Record a step output, insert-only: if a record already exists it is
    /// left untouched and the call succeeds.
    async fn put_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: &Value,
    ) -> Result<(), StoreError>;

    /// The committed wake instant of a nap, if the sleep was entered before.
    async fn find_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
    ) -> Result<Option<Timestamp>, StoreError>;

    /// Commit a nap's wake instant, insert-only like [`put_step_output`].
    ///
    /// [`put_step_output`]: WorkflowStore::put_step_output
    async fn put_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
        wake_up_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Create the unique and compound indexes the claim protocol relies on.
    /// A no-op for backends where indexes are meaningless.
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Release the backing connection. Default: nothing to release.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
