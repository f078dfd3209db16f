//! Handler registry.
//!
//! Maps handler ids to their implementations. Only the id travels through
//! the store; every worker process must register the same handlers from
//! code before it starts polling.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::context::WorkflowContext;

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A type-erased registered handler.
pub(crate) type BoxedHandler = Arc<dyn Fn(WorkflowContext, Value) -> HandlerFuture + Send + Sync>;

/// Registry of workflow handlers.
///
/// Registration happens during process setup; lookups during polling go
/// through a read lock, so concurrent dispatches are safe. There is no
/// removal: a handler id, once registered, stays resolvable for the life of
/// the process.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, BoxedHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an id. Re-registering an id replaces the
    /// previous handler.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// registry.register("double", |_ctx, input| async move {
    ///     let n = input.as_i64().unwrap_or(0);
    ///     Ok(serde_json::json!(n * 2))
    /// });
    /// ```
    pub fn register<F, Fut>(&self, handler_id: &str, handler: F)
    where
        F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: BoxedHandler =
            Arc::new(move |ctx, input| -> HandlerFuture { Box::pin(handler(ctx, input)) });
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handler_id.to_string(), handler);
    }

    /// Look up a handler by id.
    pub(crate) fn get(&self, handler_id: &str) -> Option<BoxedHandler> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(handler_id)
            .cloned()
    }

    /// Check if a handler id is registered.
    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(handler_id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
