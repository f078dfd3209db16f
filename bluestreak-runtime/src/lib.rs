//! Durable workflow execution engine over a document store.
//!
//! A workflow is a user-provided async procedure registered under a handler
//! id. The engine guarantees that each [`WorkflowContext::step`] runs
//! at-most-once against its recorded output across crashes and retries, that
//! [`WorkflowContext::sleep`] pauses survive process restarts, and that a
//! failed run resumes from the last completed step when the handler is
//! replayed.
//!
//! Workers claim due instances from the shared store through an atomic
//! claim-with-lease; any number of worker processes may poll the same store.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bluestreak_runtime::{EngineConfig, WorkflowEngine};
//! use serde_json::json;
//!
//! let engine = WorkflowEngine::connect(EngineConfig::default()).await?;
//! engine.init().await?;
//!
//! engine.register_handler("greet", |ctx, input| async move {
//!     let name: String = ctx
//!         .step("load-name", || async { Ok(format!("{input}")) })
//!         .await?;
//!     ctx.sleep("settle", 5_000).await?;
//!     Ok(json!(format!("hello {name}")))
//! });
//!
//! engine.start("w1", "greet", json!("world")).await?;
//! engine.poll().await?;
//! ```

mod client;
mod config;
mod context;
mod poller;
mod registry;
mod runner;

pub use client::WorkflowEngine;
pub use config::{EngineConfig, ErrorCallback, StopSignal};
pub use context::WorkflowContext;
pub use registry::HandlerRegistry;

pub use bluestreak_core::error::{EngineError, StoreError};

// Re-exports for embedders, matching the sibling-crate layout.
pub use bluestreak_core as core;
pub use bluestreak_persistence as persistence;
