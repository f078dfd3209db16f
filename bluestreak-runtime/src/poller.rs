//! The scheduling loop.
//!
//! One cooperative loop per `poll` call: claim a due instance, dispatch it
//! to the runner without awaiting, otherwise idle for the poll interval.
//! Horizontal scaling falls out of the claim being atomic: any number of
//! processes can run this loop against the same store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use bluestreak_core::clock::Clock;
use bluestreak_core::error::EngineError;
use bluestreak_persistence::WorkflowStore;

use crate::config::StopSignal;
use crate::runner::Runner;

pub(crate) struct Poller {
    store: Arc<dyn WorkflowStore>,
    runner: Arc<Runner>,
    clock: Arc<dyn Clock>,
    timeout_interval: Duration,
    poll_interval: Duration,
    should_stop: Option<StopSignal>,
}

impl Poller {
    pub(crate) fn new(
        store: Arc<dyn WorkflowStore>,
        runner: Arc<Runner>,
        clock: Arc<dyn Clock>,
        timeout_interval: Duration,
        poll_interval: Duration,
        should_stop: Option<StopSignal>,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
            timeout_interval,
            poll_interval,
            should_stop,
        }
    }

    fn stop_requested(&self) -> bool {
        self.should_stop.as_ref().is_some_and(|predicate| predicate())
    }

    /// Run until the stop predicate fires or an infrastructure failure
    /// surfaces from a dispatched run.
    ///
    /// Dispatch is fire-and-forget; in-flight runs are not awaited on exit.
    /// Fatal runner errors come back through a capacity-1 channel: the
    /// first one wins and ends the loop, later ones are dropped.
    pub(crate) async fn run(&self) -> Result<(), EngineError> {
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<EngineError>(1);

        info!("poller started");

        loop {
            if self.stop_requested() {
                info!("poller stopping");
                return Ok(());
            }
            if let Ok(err) = fatal_rx.try_recv() {
                error!(error = %err, "poller terminating on infrastructure failure");
                return Err(err);
            }

            let now = self.clock.now();
            let lease = now + self.timeout_interval.as_millis() as i64;

            match self.store.claim_due(now, lease).await? {
                Some(workflow_id) => {
                    debug!(workflow_id = %workflow_id, "claimed workflow");
                    let runner = Arc::clone(&self.runner);
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = runner.run(&workflow_id).await {
                            let _ = fatal_tx.try_send(err);
                        }
                    });
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        received = fatal_rx.recv() => {
                            if let Some(err) = received {
                                error!(error = %err, "poller terminating on infrastructure failure");
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
    }
}
