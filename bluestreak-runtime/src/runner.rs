//! Execution of a single claimed workflow.

use std::sync::Arc;

use tracing::{debug, error, warn};

use bluestreak_core::clock::Clock;
use bluestreak_core::error::EngineError;
use bluestreak_core::instance::WorkflowStatus;
use bluestreak_persistence::WorkflowStore;

use crate::config::EngineConfig;
use crate::context::WorkflowContext;
use crate::registry::HandlerRegistry;

/// Runs one claimed workflow to a terminal or retryable state.
///
/// Handler failures are recovered here: the instance is marked `failed` (or
/// `aborted` once the failure budget is exceeded) and the error never
/// crosses back to the poll loop. The only errors `run` returns are the two
/// infrastructure faults (a claimed id with no instance document, or an
/// instance referencing an unregistered handler), which poison every future
/// claim of the same instance and therefore stop the loop.
pub(crate) struct Runner {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Runner {
    pub(crate) fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            config,
        }
    }

    pub(crate) async fn run(&self, workflow_id: &str) -> Result<(), EngineError> {
        let run_data = match self.store.find_run_data(workflow_id).await {
            Ok(Some(run_data)) => run_data,
            Ok(None) => return Err(EngineError::WorkflowNotFound(workflow_id.to_string())),
            Err(err) => {
                // The claim stays with us until the lease expires; the next
                // claimant retries the whole run.
                error!(workflow_id, error = %err, "failed to load run data");
                return Ok(());
            }
        };

        let Some(handler) = self.registry.get(&run_data.handler_id) else {
            return Err(EngineError::HandlerNotFound(run_data.handler_id));
        };

        debug!(
            workflow_id,
            handler_id = %run_data.handler_id,
            failures = run_data.failures,
            "running claimed workflow"
        );

        let ctx = WorkflowContext::new(
            workflow_id.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.timeout_interval,
        );

        match handler(ctx, run_data.input).await {
            Ok(result) => {
                if let Err(err) = self.store.mark_finished(workflow_id, result).await {
                    error!(workflow_id, error = %err, "failed to record completion");
                } else {
                    debug!(workflow_id, "workflow finished");
                }
            }
            Err(err) => {
                let failures = run_data.failures + 1;
                let exhausted = self
                    .config
                    .max_failures
                    .is_some_and(|max| failures > max);
                let status = if exhausted {
                    WorkflowStatus::Aborted
                } else {
                    WorkflowStatus::Failed
                };
                let retry_at =
                    self.clock.now() + self.config.wait_retry_interval.as_millis() as i64;

                if let Err(store_err) = self
                    .store
                    .mark_failure(workflow_id, status, retry_at, failures)
                    .await
                {
                    error!(workflow_id, error = %store_err, "failed to record handler failure");
                }
                warn!(
                    workflow_id,
                    failures,
                    aborted = exhausted,
                    error = %err,
                    "handler failed"
                );

                if let Some(callback) = &self.config.error_callback {
                    callback(workflow_id, &err);
                }
            }
        }

        Ok(())
    }
}
