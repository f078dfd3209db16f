//! The client façade.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use bluestreak_core::clock::{Clock, SystemClock};
use bluestreak_core::error::{EngineError, StoreError};
use bluestreak_core::instance::WorkflowStatus;
use bluestreak_persistence::WorkflowStore;

use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::poller::Poller;
use crate::registry::HandlerRegistry;
use crate::runner::Runner;

/// The boundary between user code and the engine.
///
/// A cheap cloneable handle; clones share the store, registry, and clock.
/// Typical lifecycle: construct, `init`, register handlers, `start`
/// instances from anywhere, run `poll` on worker processes, `wait` from
/// whoever cares about a result, `close` on shutdown.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Create an engine over an already-constructed store.
    pub fn new(config: EngineConfig, store: Arc<dyn WorkflowStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock. Meant for tests that drive
    /// lease arithmetic with a manual clock.
    pub fn with_clock(
        config: EngineConfig,
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            clock,
            config,
        }
    }

    /// Connect to the MongoDB deployment named by `config.db_url` /
    /// `config.db_name` and build an engine over it.
    #[cfg(feature = "mongodb")]
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let store =
            bluestreak_persistence::MongoStore::connect(&config.db_url, &config.db_name).await?;
        Ok(Self::new(config, Arc::new(store)))
    }

    /// Prepare the store: creates the unique and compound indexes the claim
    /// protocol relies on. Idempotent.
    pub async fn init(&self) -> Result<(), EngineError> {
        self.store.ensure_indexes().await?;
        Ok(())
    }

    /// Release the store connection.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.store.close().await?;
        Ok(())
    }

    /// Register a handler under an id. Must happen before `poll` on every
    /// worker process that may claim instances referencing it.
    pub fn register_handler<F, Fut>(&self, handler_id: &str, handler: F)
    where
        F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.registry.register(handler_id, handler);
    }

    /// Submit a workflow instance. The instance is claimable immediately;
    /// some polling worker will pick it up.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkflowAlreadyStarted`] if the id is taken.
    pub async fn start(
        &self,
        workflow_id: &str,
        handler_id: &str,
        input: Value,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        match self
            .store
            .insert_instance(workflow_id, handler_id, input, now)
            .await
        {
            Ok(()) => {
                debug!(workflow_id, handler_id, "workflow started");
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => {
                Err(EngineError::WorkflowAlreadyStarted(workflow_id.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Block until the workflow finishes, probing its status up to
    /// `retries` times with `pause_interval` between probes.
    ///
    /// # Errors
    ///
    /// [`EngineError::WorkflowNotFound`] if no such instance exists;
    /// [`EngineError::WaitTimeout`] once the retry budget is exhausted,
    /// including over an aborted instance, which never finishes.
    pub async fn wait(
        &self,
        workflow_id: &str,
        retries: u32,
        pause_interval: Duration,
    ) -> Result<Value, EngineError> {
        for attempt in 0..retries {
            match self.store.find_status_and_result(workflow_id).await? {
                None => return Err(EngineError::WorkflowNotFound(workflow_id.to_string())),
                Some(probe) if probe.status == WorkflowStatus::Finished => {
                    return Ok(probe.result.unwrap_or(Value::Null));
                }
                Some(_) => {
                    if attempt + 1 < retries {
                        tokio::time::sleep(pause_interval).await;
                    }
                }
            }
        }
        Err(EngineError::WaitTimeout(workflow_id.to_string()))
    }

    /// Run the scheduling loop on this process until the configured stop
    /// predicate fires (`Ok`) or the first infrastructure failure surfaces
    /// from a dispatched run (`Err`). Handler failures never end the loop.
    pub async fn poll(&self) -> Result<(), EngineError> {
        let runner = Runner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.clone(),
        );
        let poller = Poller::new(
            Arc::clone(&self.store),
            Arc::new(runner),
            Arc::clone(&self.clock),
            self.config.timeout_interval,
            self.config.poll_interval,
            self.config.should_stop.clone(),
        );
        poller.run().await
    }
}
