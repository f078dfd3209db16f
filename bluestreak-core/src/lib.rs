//! Core types for the bluestreak durable workflow engine.
//!
//! This crate holds everything the engine persists or reasons about without
//! doing I/O: the workflow instance / step / nap data model with its wire
//! field names, the error taxonomy shared by stores and the runtime, and the
//! millisecond clock abstraction that keeps lease arithmetic testable.

pub mod clock;
pub mod error;
pub mod instance;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{EngineError, StoreError};
pub use instance::{
    NapRecord, RunData, StatusAndResult, StepRecord, WorkflowInstance, WorkflowStatus,
};
