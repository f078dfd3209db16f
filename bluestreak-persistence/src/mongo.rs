//! MongoDB-backed workflow store.
//!
//! Document shapes and field names follow the wire schema in
//! `bluestreak-core::instance`; the claim is a single `findOneAndUpdate`
//! and the step/nap writes are `$setOnInsert` upserts, so all coordination
//! between workers happens inside the server.

use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;

use bluestreak_core::clock::Timestamp;
use bluestreak_core::error::StoreError;
use bluestreak_core::instance::{
    NapRecord, RunData, StatusAndResult, StepRecord, WorkflowInstance, WorkflowStatus,
};

use crate::store::WorkflowStore;

const WORKFLOWS: &str = "workflows";
const STEPS: &str = "steps";
const NAPS: &str = "naps";

/// Workflow store over three MongoDB collections.
pub struct MongoStore {
    client: Client,
    workflows: Collection<WorkflowInstance>,
    steps: Collection<StepRecord>,
    naps: Collection<NapRecord>,
}

impl MongoStore {
    /// Connect to the given MongoDB deployment and bind the collections.
    ///
    /// Call [`WorkflowStore::ensure_indexes`] afterwards (the engine's
    /// `init` does) before polling against a fresh database.
    pub async fn connect(db_url: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(db_url).await.map_err(backend)?;
        Ok(Self::with_client(client, db_name))
    }

    /// Bind the collections on an existing client.
    pub fn with_client(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self {
            workflows: db.collection(WORKFLOWS),
            steps: db.collection(STEPS),
            naps: db.collection(NAPS),
            client,
        }
    }
}

fn backend(err: mongodb::error::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        _ => false,
    }
}

fn to_bson(value: &Value) -> Result<Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl WorkflowStore for MongoStore {
    async fn insert_instance(
        &self,
        workflow_id: &str,
        handler_id: &str,
        input: Value,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let instance = WorkflowInstance {
            workflow_id: workflow_id.to_string(),
            handler_id: handler_id.to_string(),
            input,
            failures: 0,
            status: WorkflowStatus::Idle,
            timeout_at: now,
            result: None,
        };

        self.workflows.insert_one(&instance).await.map_err(|err| {
            if is_duplicate_key(&err) {
                StoreError::AlreadyExists(workflow_id.to_string())
            } else {
                backend(err)
            }
        })?;
        Ok(())
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        new_timeout_at: Timestamp,
    ) -> Result<Option<String>, StoreError> {
        let claimed = self
            .workflows
            .find_one_and_update(
                doc! {
                    "status": { "$in": ["idle", "running", "failed"] },
                    "timeoutAt": { "$lt": now },
                },
                doc! { "$set": { "status": "running", "timeoutAt": new_timeout_at } },
            )
            // Oldest lease first, matching the in-memory backend: a
            // perpetually-due instance cannot starve.
            .sort(doc! { "timeoutAt": 1 })
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend)?;

        Ok(claimed.map(|instance| instance.workflow_id))
    }

    async fn find_run_data(&self, workflow_id: &str) -> Result<Option<RunData>, StoreError> {
        let found = self
            .workflows
            .find_one(doc! { "workflowId": workflow_id })
            .await
            .map_err(backend)?;

        Ok(found.map(|i| RunData {
            handler_id: i.handler_id,
            input: i.input,
            failures: i.failures,
        }))
    }

    async fn find_status_and_result(
        &self,
        workflow_id: &str,
    ) -> Result<Option<StatusAndResult>, StoreError> {
        let found = self
            .workflows
            .find_one(doc! { "workflowId": workflow_id })
            .await
            .map_err(backend)?;

        Ok(found.map(|i| StatusAndResult {
            status: i.status,
            result: i.result,
        }))
    }

    async fn mark_finished(&self, workflow_id: &str, result: Value) -> Result<(), StoreError> {
        // The status filter keeps terminal instances terminal: a worker
        // that outlived its lease matches nothing and the write is a no-op.
        self.workflows
            .update_one(
                doc! {
                    "workflowId": workflow_id,
                    "status": { "$in": ["idle", "running", "failed"] },
                },
                doc! { "$set": { "status": "finished", "result": to_bson(&result)? } },
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn mark_failure(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        new_timeout_at: Timestamp,
        new_failures: u32,
    ) -> Result<(), StoreError> {
        self.workflows
            .update_one(
                doc! {
                    "workflowId": workflow_id,
                    "status": { "$in": ["idle", "running", "failed"] },
                },
                doc! { "$set": {
                    "status": status.as_str(),
                    "timeoutAt": new_timeout_at,
                    "failures": new_failures as i64,
                } },
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn extend_lease(
        &self,
        workflow_id: &str,
        new_timeout_at: Timestamp,
    ) -> Result<(), StoreError> {
        let updated = self
            .workflows
            .update_one(
                doc! { "workflowId": workflow_id },
                doc! { "$set": { "timeoutAt": new_timeout_at } },
            )
            .await
            .map_err(backend)?;

        if updated.matched_count == 0 {
            return Err(StoreError::NotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    async fn find_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let found = self
            .steps
            .find_one(doc! { "workflowId": workflow_id, "stepId": step_id })
            .await
            .map_err(backend)?;

        Ok(found.map(|record| record.output))
    }

    async fn put_step_output(
        &self,
        workflow_id: &str,
        step_id: &str,
        output: &Value,
    ) -> Result<(), StoreError> {
        let result = self
            .steps
            .update_one(
                doc! { "workflowId": workflow_id, "stepId": step_id },
                doc! { "$setOnInsert": {
                    "workflowId": workflow_id,
                    "stepId": step_id,
                    "output": to_bson(output)?,
                } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Two upserts racing on the same key: the loser's insert trips
            // the unique index, which is the record already existing.
            Err(err) if is_duplicate_key(&err) => Ok(()),
            Err(err) => Err(backend(err)),
        }
    }

    async fn find_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
    ) -> Result<Option<Timestamp>, StoreError> {
        let found = self
            .naps
            .find_one(doc! { "workflowId": workflow_id, "napId": nap_id })
            .await
            .map_err(backend)?;

        Ok(found.map(|record| record.wake_up_at))
    }

    async fn put_nap_wake(
        &self,
        workflow_id: &str,
        nap_id: &str,
        wake_up_at: Timestamp,
    ) -> Result<(), StoreError> {
        let result = self
            .naps
            .update_one(
                doc! { "workflowId": workflow_id, "napId": nap_id },
                doc! { "$setOnInsert": {
                    "workflowId": workflow_id,
                    "napId": nap_id,
                    "wakeUpAt": wake_up_at,
                } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Ok(()),
            Err(err) => Err(backend(err)),
        }
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        fn unique(keys: Document) -> IndexModel {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        }

        self.workflows
            .create_index(unique(doc! { "workflowId": 1 }))
            .await
            .map_err(backend)?;
        self.workflows
            .create_index(IndexModel::builder().keys(doc! { "status": 1, "timeoutAt": 1 }).build())
            .await
            .map_err(backend)?;
        self.steps
            .create_index(unique(doc! { "workflowId": 1, "stepId": 1 }))
            .await
            .map_err(backend)?;
        self.naps
            .create_index(unique(doc! { "workflowId": 1, "napId": 1 }))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
