//! The persisted data model.
//!
//! Three entity families back the engine: the mutable workflow instance and
//! the write-once step and nap records owned by it. The serde renames pin
//! the wire field names so every store implementation reads and writes the
//! same documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;

/// Lifecycle state of a workflow instance.
///
/// `Finished` and `Aborted` are terminal; the other three states satisfy
/// the claim predicate and become claimable once `timeout_at` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created but never claimed.
    Idle,
    /// Claimed by a worker; the lease runs until `timeout_at`.
    Running,
    /// The handler failed; eligible for re-claim after `timeout_at`.
    Failed,
    /// The handler exceeded its failure budget. Dormant until an operator
    /// intervenes.
    Aborted,
    /// The handler returned; `result` is recorded.
    Finished,
}

impl WorkflowStatus {
    /// The wire representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Idle => "idle",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Aborted => "aborted",
            WorkflowStatus::Finished => "finished",
        }
    }

    /// Whether the poller may still claim an instance in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Idle | WorkflowStatus::Running | WorkflowStatus::Failed
        )
    }
}

/// A workflow instance document.
///
/// The only mutable entity in the model. `timeout_at` doubles as the lease:
/// while the status is claimable, no worker may (re-)claim the instance
/// before that instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Externally supplied unique id.
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
    /// Registry key of the handler that runs this workflow.
    #[serde(rename = "handlerId")]
    pub handler_id: String,
    /// Opaque input passed to the handler on every run.
    pub input: Value,
    /// How many runs have failed so far.
    pub failures: u32,
    pub status: WorkflowStatus,
    /// Earliest instant at which the instance may be (re-)claimed.
    #[serde(rename = "timeoutAt")]
    pub timeout_at: Timestamp,
    /// Present exactly when `status` is `Finished`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// A recorded step output. Write-once; existence means the step has run to
/// completion and its output is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
    #[serde(rename = "stepId")]
    pub step_id: String,
    pub output: Value,
}

/// A recorded pause. Write-once; the wake instant computed on first entry
/// governs every replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NapRecord {
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
    #[serde(rename = "napId")]
    pub nap_id: String,
    #[serde(rename = "wakeUpAt")]
    pub wake_up_at: Timestamp,
}

/// Projection of an instance for the runner: everything needed to execute
/// one run.
#[derive(Debug, Clone)]
pub struct RunData {
    pub handler_id: String,
    pub input: Value,
    pub failures: u32,
}

/// Projection of an instance for `wait`.
#[derive(Debug, Clone)]
pub struct StatusAndResult {
    pub status: WorkflowStatus,
    pub result: Option<Value>,
}
