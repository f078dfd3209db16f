//! Store gateway for the bluestreak workflow engine.
//!
//! This crate owns the persistence boundary: the [`WorkflowStore`] trait
//! covering every typed operation the engine performs against the document
//! store, plus two implementations:
//!
//! - [`InMemoryStore`]: mutex-guarded maps. Not durable; for tests, demos,
//!   and as the reference semantics for the claim protocol.
//! - `MongoStore`: the production backend over MongoDB (requires the
//!   `mongodb` feature). Owns index creation and the on-the-wire document
//!   shapes.
//!
//! # Implementing a custom store
//!
//! Implement [`WorkflowStore`] for your backend. The two contracts that
//! carry the engine's correctness are `claim_due` (one atomic
//! find-and-update; two racing workers must never both receive the same
//! instance) and the insert-only upserts on step and nap records (a
//! concurrent duplicate write must leave the existing record untouched).
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use bluestreak_persistence::{StoreError, WorkflowStore};
//!
//! pub struct RedisStore { /* your client */ }
//!
//! #[async_trait]
//! impl WorkflowStore for RedisStore {
//!     async fn claim_due(&self, now: i64, new_timeout_at: i64)
//!         -> Result<Option<String>, StoreError>
//!     {
//!         // single atomic conditional update
//!     }
//!     // ... remaining operations
//! }
//! ```

mod in_memory;
#[cfg(feature = "mongodb")]
mod mongo;
mod store;

pub use bluestreak_core::error::StoreError;
pub use in_memory::InMemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
pub use store::WorkflowStore;
