//! Error types shared by the store implementations and the runtime.

use thiserror::Error;

/// Errors produced by a workflow store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique-index collision: the document already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The requested document does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// An untyped fault in the backing store.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to engine callers.
///
/// Handler-produced failures never appear here: the runner records them as
/// retries on the instance and moves on. These variants are the engine's own
/// failures (missing documents, missing registrations, exhausted waits),
/// plus a passthrough for store I/O faults hit by a façade operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No workflow instance exists under this id.
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// A claimed instance references a handler id nothing was registered
    /// under. Fatal to the poll loop: retrying cannot help until the
    /// process registers the handler.
    #[error("no handler registered under '{0}'")]
    HandlerNotFound(String),

    /// `wait` exhausted its retry budget before the workflow finished.
    #[error("timed out waiting for workflow '{0}'")]
    WaitTimeout(String),

    /// `start` collided with an existing workflow id.
    #[error("workflow '{0}' already started")]
    WorkflowAlreadyStarted(String),

    /// An I/O fault in the backing store.
    #[error(transparent)]
    Store(#[from] StoreError),
}
