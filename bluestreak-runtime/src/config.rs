//! Engine configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Advisory callback invoked with `(workflow_id, error)` after a handler
/// failure has been recorded. Infallible by signature; keep it cheap.
pub type ErrorCallback = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Predicate checked once per poll iteration; `true` ends the loop.
pub type StopSignal = Arc<dyn Fn() -> bool + Send + Sync>;

/// Configuration for a [`WorkflowEngine`](crate::WorkflowEngine).
///
/// All fields have defaults. `timeout_interval` is the lease granted on
/// claim and refreshed after each completed step. It is a liveness knob,
/// not a correctness one: a worker that outlives its lease only risks a
/// second worker double-invoking step closures whose outputs were not yet
/// recorded.
#[derive(Clone)]
pub struct EngineConfig {
    /// Connection string for the backing document store.
    /// Default: `mongodb://localhost:27017`.
    pub db_url: String,

    /// Database name. Default: `bluestreak`.
    pub db_name: String,

    /// Lease duration granted on claim and on each lease refresh.
    /// Default: 10 seconds.
    pub timeout_interval: Duration,

    /// How long the poller idles when no instance is due.
    /// Default: 5 seconds.
    pub poll_interval: Duration,

    /// Not-before delay applied to an instance after a failed run.
    /// Default: 1 second.
    pub wait_retry_interval: Duration,

    /// Failure budget. A run that pushes `failures` past this bound aborts
    /// the instance instead of scheduling a retry. `None` retries forever.
    pub max_failures: Option<u32>,

    /// Invoked after each recorded handler failure. `None` stays silent.
    pub error_callback: Option<ErrorCallback>,

    /// Stop predicate for `poll`. Without one the loop only ends on an
    /// infrastructure failure.
    pub should_stop: Option<StopSignal>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_url: "mongodb://localhost:27017".to_string(),
            db_name: "bluestreak".to_string(),
            timeout_interval: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(5_000),
            wait_retry_interval: Duration::from_millis(1_000),
            max_failures: None,
            error_callback: None,
            should_stop: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("db_url", &self.db_url)
            .field("db_name", &self.db_name)
            .field("timeout_interval", &self.timeout_interval)
            .field("poll_interval", &self.poll_interval)
            .field("wait_retry_interval", &self.wait_retry_interval)
            .field("max_failures", &self.max_failures)
            .field("error_callback", &self.error_callback.as_ref().map(|_| "<fn>"))
            .field("should_stop", &self.should_stop.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
