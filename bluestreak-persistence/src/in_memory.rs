//! In-memory implementation of the workflow store.
//!
//! Mutex-guarded maps, one per collection. Not durable; useful for tests
//! and as the reference semantics for the claim protocol.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use bluestreak_core::clock::Timestamp;
use bluestreak_core::error::StoreError;
use bluestreak_core::instance::{RunData, StatusAndResult, WorkflowInstance, WorkflowStatus};

use crate::store::WorkflowStore;

/// In-memory store over three HashMaps.
///
/// Thread-safe. Claim atomicity comes from holding the instance lock across
/// the find-and-flip, which is exactly the mutual exclusion the claim
/// protocol asks of a real document store.
#[derive(Default)]
pub struct InMemoryStore {
    instances: Mutex<HashMap<String, WorkflowInstance>>,
    steps: Mutex<HashMap<(String, String), Value>>,
    naps: Mutex<HashMap<(String, String), Timestamp>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, StoreError> {
        m.lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))
    }

    /// Snapshot of one instance document, for assertions in tests.
    pub fn instance(&self, workflow_id: &str) -> Option<WorkflowInstance> {
        self.instances
            .lock()
            .ok()
            .and_then(|instances| instances.get(workflow_id).cloned())
    }

    /// Number of recorded step outputs, for assertions in tests.
    pub fn step_count(&self) -> usize {
        self.steps.lock().map(|steps| steps.len()).unwrap_or(0)
    }

    /// Number of recorded nap wake instants, for assertions in tests.
    pub fn nap_count(&self) -> usize {
        self.naps.lock().map(|naps| naps.len()).unwrap_or(0)
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_instance(
        &self,
        workflow_id: &str,
        handler_id: &str,
        input: Value,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut instances = self.lock(&self.instances)?;
        if instances.contains_key(workflow_id) {
            return Err(StoreError::AlreadyExists(workflow_id.to_string()));
        }
        instances.insert(
            workflow_id.to_string(),
            WorkflowInstance {
                workflow_id: workflow_id.to_string(),
                handler_id: handler_id.to_string(),
                input,
                failures: 0,
                status: WorkflowStatus::Idle,
                timeout_at: now,
                result: None,
            },
        );
        Ok(())
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        new_timeout_at: Timestamp,
    ) -> Result<Option<String>, StoreError> {
        let mut instances = self.lock(&self.instances)?;

        // Oldest lease first, so a perpetually-due instance cannot starve.
        let candidate = instances
            .values()
            .filter(|i| i.status.is_claimable() && i.timeout_at < now)
            .min_by_key(|i| i.timeout_at)
            .map(|i| i.workflow_id.clone());

        if let Some(workflow_id) = candidate {
            let instance = instances
                .get_mut(&workflow_id)
                .ok_or_else(|| StoreError::NotFound(workflow_id.clone()))?;
            instance.status = WorkflowStatus::Running;
            instance.timeout_at = new_timeout_at;
            Ok(Some(workflow_id))
        } else {
            Ok(None)
        }
    }

    async fn find_run_data(&self, workflow_id: &str) -> Result<Option<RunData>, StoreError> {
        let instances = self.lock(&self.instances)?;
        Ok(instances.get(workflow_id).map(|i| RunData {
            handler_id: i.handler_id.clone(),
            input: i.input.clone(),
            failures: i.failures,
        }))
    }

    async fn find_status_and_result(
        &self,
        workflow_id: &str,
    ) -> Result<Option<StatusAndResult>, StoreError> {
        let instances = self.lock(&self.instances)?;
        Ok(instances.get(workflow_id).map(|i| StatusAndResult {
            status: i.status,
            result: i.result.clone(),
        }))
    }

    async fn mark_finished(&self, workflow_id: &str, result: Value) -> Result<(), StoreError> {
        let mut instances = self.lock(&self.instances)?;
        let instance = instances
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        // Terminal states stay put: a worker that outlived its lease must
        // not overwrite what a later claimant recorded.
        if instance.status.is_claimable() {
            instance.status = WorkflowStatus::Finished;
            instance.result = Some(result);
        }
        Ok(())
    }

    async fn mark_failure(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        new_timeout_at: Timestamp,
        new_failures: u32,
    ) -> Result<(), StoreError> {
        let mut instances = self.lock(&self.instances)?;
        let instance = instances
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        if instance.status.is_claimable() {
            instance.status = status;
            instance.timeout_at = new_timeout_at;
            instance.failures = new_failures;
        }
        Ok(())
    }

    async fn extend_lease(
        &self,
        workflow_id: &str,
        new_timeout_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut instances = self.lock(&self.instances)?;
        let instance = instances
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        instance.timeout_at = new_timeout_at;
        Ok(())
    }

    async fn find_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let steps = self.lock(&self.steps)?;
        Ok(steps
            .get(&(workflow_id.to_string(), step_id.to_string()))
            .cloned())
    }

    async fn put_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: &Value,
    ) -> Result<(), StoreError> {
        let mut steps = self.lock(&self.steps)?;
        steps
            .entry((workflow_id.to_string(), step_id.to_string()))
            .or_insert_with(|| output.clone());
        Ok(())
    }

    async fn find_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
    ) -> Result<Option<Timestamp>, StoreError> {
        let naps = self.lock(&self.naps)?;
        Ok(naps
            .get(&(workflow_id.to_string(), nap_id.to_string()))
            .copied())
    }

    async fn put_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
        wake_up_at: Timestamp,
    ) -> Result<(), StoreError> {
        let mut naps = self.lock(&self.naps)?;
        naps.entry((workflow_id.to_string(), nap_id.to_string()))
            .or_insert(wake_up_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_then_project() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!({"x": 1}), 1_000_000)
            .await
            .unwrap();

        let run = store.find_run_data("w1").await.unwrap().unwrap();
        assert_eq!(run.handler_id, "h");
        assert_eq!(run.input, json!({"x": 1}));
        assert_eq!(run.failures, 0);

        let probe = store.find_status_and_result("w1").await.unwrap().unwrap();
        assert_eq!(probe.status, WorkflowStatus::Idle);
        assert!(probe.result.is_none());
    }

    #[tokio::test]
    async fn insert_duplicate_id_collides() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        let result = store.insert_instance("w1", "h", json!(null), 1_000_001).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn claim_due_flips_status_and_lease() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        let claimed = store.claim_due(1_000_001, 1_010_001).await.unwrap();
        assert_eq!(claimed.as_deref(), Some("w1"));

        let instance = store.instance("w1").unwrap();
        assert_eq!(instance.status, WorkflowStatus::Running);
        assert_eq!(instance.timeout_at, 1_010_001);
    }

    #[tokio::test]
    async fn claim_due_respects_the_lease() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        // timeout_at == now is not yet due (strict <)
        assert!(store.claim_due(1_000_000, 1_010_000).await.unwrap().is_none());

        // a running instance holds its lease until timeout_at passes
        store.claim_due(1_000_001, 1_010_001).await.unwrap().unwrap();
        assert!(store.claim_due(1_005_000, 1_015_000).await.unwrap().is_none());

        // once the lease expires the same instance is handed out again
        let reclaimed = store.claim_due(1_010_002, 1_020_002).await.unwrap();
        assert_eq!(reclaimed.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn claim_due_skips_terminal_statuses() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();
        store.mark_finished("w1", json!("ok")).await.unwrap();
        assert!(store.claim_due(2_000_000, 2_010_000).await.unwrap().is_none());

        store
            .insert_instance("w2", "h", json!(null), 1_000_000)
            .await
            .unwrap();
        store
            .mark_failure("w2", WorkflowStatus::Aborted, 1_001_000, 4)
            .await
            .unwrap();
        assert!(store.claim_due(2_000_000, 2_010_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_due_prefers_the_oldest_lease() {
        let store = InMemoryStore::new();
        store
            .insert_instance("late", "h", json!(null), 1_000_500)
            .await
            .unwrap();
        store
            .insert_instance("early", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        let first = store.claim_due(1_001_000, 1_011_000).await.unwrap();
        assert_eq!(first.as_deref(), Some("early"));
        let second = store.claim_due(1_001_000, 1_011_000).await.unwrap();
        assert_eq!(second.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_one_instance_once() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryStore::new());
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim_due(1_000_001, 1_010_001).await.unwrap() }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.claim_due(1_000_001, 1_010_001).await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.is_some() ^ b.is_some(), "exactly one claim must win");
    }

    #[tokio::test]
    async fn step_output_is_insert_only() {
        let store = InMemoryStore::new();

        store
            .put_step_output("w1", "s1", &json!("first"))
            .await
            .unwrap();
        store
            .put_step_output("w1", "s1", &json!("second"))
            .await
            .unwrap();

        let output = store.find_step_output("w1", "s1").await.unwrap();
        assert_eq!(output, Some(json!("first")));
        assert_eq!(store.step_count(), 1);
    }

    #[tokio::test]
    async fn nap_wake_is_insert_only() {
        let store = InMemoryStore::new();

        store.put_nap_wake("w1", "n1", 1_005_000).await.unwrap();
        store.put_nap_wake("w1", "n1", 9_999_999).await.unwrap();

        let wake = store.find_nap_wake("w1", "n1").await.unwrap();
        assert_eq!(wake, Some(1_005_000));
    }

    #[tokio::test]
    async fn stale_finalize_does_not_resurrect_a_finished_instance() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();
        store.mark_finished("w1", json!("first")).await.unwrap();

        // a worker whose lease expired mid-run reports late
        store
            .mark_failure("w1", WorkflowStatus::Failed, 1_002_000, 1)
            .await
            .unwrap();
        store.mark_finished("w1", json!("second")).await.unwrap();

        let instance = store.instance("w1").unwrap();
        assert_eq!(instance.status, WorkflowStatus::Finished);
        assert_eq!(instance.result, Some(json!("first")));
        assert_eq!(instance.failures, 0);
    }

    #[tokio::test]
    async fn stale_finalize_does_not_touch_an_aborted_instance() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();
        store
            .mark_failure("w1", WorkflowStatus::Aborted, 1_001_000, 4)
            .await
            .unwrap();

        store.mark_finished("w1", json!("late")).await.unwrap();
        store
            .mark_failure("w1", WorkflowStatus::Failed, 1_005_000, 5)
            .await
            .unwrap();

        let instance = store.instance("w1").unwrap();
        assert_eq!(instance.status, WorkflowStatus::Aborted);
        assert_eq!(instance.failures, 4);
        assert_eq!(instance.timeout_at, 1_001_000);
        assert!(instance.result.is_none());
    }

    #[tokio::test]
    async fn extend_lease_touches_only_the_timeout() {
        let store = InMemoryStore::new();
        store
            .insert_instance("w1", "h", json!(null), 1_000_000)
            .await
            .unwrap();

        store.extend_lease("w1", 1_015_000).await.unwrap();

        let instance = store.instance("w1").unwrap();
        assert_eq!(instance.timeout_at, 1_015_000);
        assert_eq!(instance.status, WorkflowStatus::Idle);
        assert_eq!(instance.failures, 0);
    }

    #[tokio::test]
    async fn missing_instance_lookups_return_none() {
        let store = InMemoryStore::new();
        assert!(store.find_run_data("ghost").await.unwrap().is_none());
        assert!(store.find_status_and_result("ghost").await.unwrap().is_none());
        assert!(matches!(
            store.extend_lease("ghost", 1).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
