use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::monitor::model::{CheckResult, Monitor};
use crate::monitor::transition::{evaluate, AlertEvent, Direction};
use crate::probe::{Prober, RetryPolicy};
use crate::store::{MonitorStore, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("storage failed for monitor {monitor_id}: {source}")]
    Store {
        monitor_id: i64,
        #[source]
        source: StoreError,
    },

    #[error("monitor {0} not found")]
    NotFound(i64),

    #[error("cycle task for monitor {monitor_id} aborted: {reason}")]
    Aborted { monitor_id: i64, reason: String },
}

/// What one completed cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub monitor_id: i64,
    pub check_id: i64,
    pub result: CheckResult,
    pub alert: Option<Direction>,
}

/// Result of a scheduled cycle attempt.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The previous cycle for this monitor was still running.
    Skipped,
    Failed(CycleError),
}

impl CycleOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// The cycles launched by one scheduler tick.
#[derive(Debug, Default)]
pub struct TickHandle {
    tasks: Vec<(i64, JoinHandle<CycleOutcome>)>,
}

impl TickHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn monitor_ids(&self) -> Vec<i64> {
        self.tasks.iter().map(|(id, _)| *id).collect()
    }

    /// Wait for every launched cycle.
    pub async fn join(self) -> Vec<(i64, CycleOutcome)> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (monitor_id, task) in self.tasks {
            let outcome = task.await.unwrap_or_else(|e| {
                CycleOutcome::Failed(CycleError::Aborted {
                    monitor_id,
                    reason: e.to_string(),
                })
            });
            outcomes.push((monitor_id, outcome));
        }
        outcomes
    }
}

/// Runs check cycles: probe with retries, persist, detect transitions, alert.
///
/// Cheap to clone; clones share the store, prober and in-flight guards. At
/// most one cycle per monitor runs at a time.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn MonitorStore>,
    prober: Arc<dyn Prober>,
    retry: RetryPolicy,
    alert_tx: Option<UnboundedSender<AlertEvent>>,
    in_flight: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        prober: Arc<dyn Prober>,
        config: &EngineConfig,
        alert_tx: Option<UnboundedSender<AlertEvent>>,
    ) -> Self {
        Self {
            store,
            prober,
            retry: RetryPolicy::from_config(config),
            alert_tx,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MonitorStore> {
        &self.store
    }

    fn guard(&self, monitor_id: i64) -> Arc<Mutex<()>> {
        self.in_flight.entry(monitor_id).or_default().clone()
    }

    /// Drop the in-flight guard of a deleted monitor.
    pub fn forget(&self, monitor_id: i64) {
        self.in_flight.remove(&monitor_id);
    }

    /// Load active monitors and launch one independent cycle per monitor.
    /// Returns as soon as the cycles are spawned.
    pub async fn tick(&self) -> Result<TickHandle, StoreError> {
        let monitors = self.store.list_active().await?;
        debug!(count = monitors.len(), "Dispatching scheduled checks");

        let tasks = monitors
            .into_iter()
            .map(|monitor| {
                let engine = self.clone();
                let id = monitor.id;
                (id, tokio::spawn(async move { engine.scheduled_cycle(id).await }))
            })
            .collect();

        Ok(TickHandle { tasks })
    }

    async fn scheduled_cycle(&self, monitor_id: i64) -> CycleOutcome {
        let Ok(_running) = self.guard(monitor_id).try_lock_owned() else {
            warn!(monitor_id, "Previous check still running, skipping this tick");
            return CycleOutcome::Skipped;
        };

        let monitor = match self.store.get_monitor(monitor_id).await {
            Ok(Some(monitor)) if monitor.active => monitor,
            Ok(_) => {
                debug!(monitor_id, "Monitor gone or paused before its check ran");
                return CycleOutcome::Skipped;
            }
            Err(source) => {
                error!(monitor_id, error = %source, "Failed to load monitor");
                return CycleOutcome::Failed(CycleError::Store { monitor_id, source });
            }
        };

        match self.run_cycle(&monitor).await {
            Ok(report) => CycleOutcome::Completed(report),
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    /// Manual check outside the cadence. Waits for a running cycle of the
    /// same monitor instead of skipping.
    pub async fn check_now(&self, monitor_id: i64) -> Result<CycleReport, CycleError> {
        let _running = self.guard(monitor_id).lock_owned().await;

        let monitor = self
            .store
            .get_monitor(monitor_id)
            .await
            .map_err(|source| CycleError::Store { monitor_id, source })?
            .ok_or(CycleError::NotFound(monitor_id))?;

        self.run_cycle(&monitor).await
    }

    /// Spawn [`Engine::check_now`] in the background.
    pub fn trigger(&self, monitor_id: i64) -> JoinHandle<Result<CycleReport, CycleError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.check_now(monitor_id).await;
            if let Err(e) = &result {
                warn!(monitor_id, error = %e, "Manual check failed");
            }
            result
        })
    }

    /// One full cycle for `monitor`, whose `last_check` is the prior state.
    ///
    /// A storage failure aborts the cycle: nothing is persisted and no alert
    /// is sent.
    #[tracing::instrument(skip(self, monitor), fields(monitor_id = monitor.id, kind = %monitor.kind))]
    pub async fn run_cycle(&self, monitor: &Monitor) -> Result<CycleReport, CycleError> {
        let prober = &self.prober;
        let outcome = self
            .retry
            .run(|attempt| {
                debug!(attempt, url = %monitor.url, "Probing");
                prober.probe(&monitor.url, &monitor.kind)
            })
            .await;

        let result = CheckResult::from_outcome(outcome, Utc::now());

        let check_id = self
            .store
            .record_check(monitor.id, &result)
            .await
            .map_err(|source| {
                error!(error = %source, status = result.status, "Failed to persist check result");
                CycleError::Store {
                    monitor_id: monitor.id,
                    source,
                }
            })?;

        info!(
            name = %monitor.name,
            status = result.status,
            latency_ms = result.latency_ms,
            up = outcome.is_up(),
            "Check completed"
        );

        let alert = evaluate(monitor.last_status(), result.status);
        if let Some(direction) = alert {
            self.emit(AlertEvent::new(monitor, &result, direction));
        }

        Ok(CycleReport {
            monitor_id: monitor.id,
            check_id,
            result,
            alert,
        })
    }

    fn emit(&self, event: AlertEvent) {
        let Some(tx) = &self.alert_tx else {
            debug!(monitor_id = event.monitor_id, "No alert sink configured");
            return;
        };
        if let Err(e) = tx.send(event) {
            warn!(monitor_id = e.0.monitor_id, "Alert sink closed, dropping alert");
        }
    }
}
