//! Restart policy and health tracking for the background loops.
//!
//! Each iteration of a supervised loop runs in its own tokio task so a panic
//! is contained to that iteration. Whatever the outcome, the supervisor
//! records it in the [`HealthRegistry`], waits the retry delay and starts the
//! next iteration. Supervised loops stop only when the runtime shuts down or
//! the returned handle is aborted.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use lumen_core::error::LumenError;

/// State name recorded while a component waits to restart.
pub const STATE_BACKOFF: &str = "backoff";

/// Observable state of one background component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Current state, e.g. "following", "rolling_back", "backoff".
    pub state: String,
    /// Number of times the component has been restarted.
    pub restarts: u64,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// When this entry last changed.
    pub updated_at: DateTime<Utc>,
}

/// Shared health table, keyed by component name.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    components: RwLock<BTreeMap<String, ComponentHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current state of `component`.
    pub fn set_state(&self, component: &str, state: &str) {
        let mut components = self.components.write();
        let entry = components
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth {
                state: String::new(),
                restarts: 0,
                last_error: None,
                updated_at: Utc::now(),
            });
        entry.state = state.to_string();
        entry.updated_at = Utc::now();
    }

    /// Record a restart, optionally caused by `error`, and mark the component backing off.
    pub fn record_restart(&self, component: &str, error: Option<String>) {
        self.set_state(component, STATE_BACKOFF);
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(component) {
            entry.restarts += 1;
            if error.is_some() {
                entry.last_error = error;
            }
        }
    }

    pub fn get(&self, component: &str) -> Option<ComponentHealth> {
        self.components.read().get(component).cloned()
    }

    /// Copy of every component's health.
    pub fn snapshot(&self) -> BTreeMap<String, ComponentHealth> {
        self.components.read().clone()
    }
}

/// Aborts the wrapped task when dropped, so aborting the supervisor also
/// stops the iteration it is waiting on.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `task` forever under supervision.
///
/// `task` is called once per iteration to build the iteration's future.
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    health: Arc<HealthRegistry>,
    retry_delay: Duration,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), LumenError>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let iteration = tokio::spawn(task());
            let _guard = AbortOnDrop(iteration.abort_handle());

            match iteration.await {
                Ok(Ok(())) => {
                    info!(task = name, "task finished, restarting");
                    health.record_restart(name, None);
                }
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task failed, retrying in {:?}", retry_delay);
                    health.record_restart(name, Some(e.to_string()));
                }
                Err(e) if e.is_panic() => {
                    error!(task = name, "task panicked, restarting in {:?}", retry_delay);
                    health.record_restart(name, Some("task panicked".to_string()));
                }
                Err(_) => {
                    info!(task = name, "task cancelled, supervisor exiting");
                    return;
                }
            }

            tokio::time::sleep(retry_delay).await;
        }
    })
}
