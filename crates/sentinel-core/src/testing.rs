//! In-process doubles for the store and prober seams, shared by unit tests,
//! integration tests and the API crate's tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::monitor::{CheckResult, LastCheck, Monitor, NewMonitor, ProbeKind, ProbeOutcome};
use crate::probe::Prober;
use crate::store::{CheckRecord, MonitorStore, Result, StoreError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Tables {
    monitors: Vec<Monitor>,
    checks: Vec<CheckRecord>,
    next_monitor_id: i64,
    next_check_id: i64,
}

/// A [`MonitorStore`] held in memory. Reads of the active set and check
/// writes can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent check write fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `list_active` fail with a database error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn check_count(&self) -> usize {
        lock(&self.tables).checks.len()
    }

    fn write_guard(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Sqlx(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Monitor>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Sqlx(sqlx::Error::PoolClosed));
        }
        Ok(lock(&self.tables)
            .monitors
            .iter()
            .filter(|m| m.active)
            .cloned()
            .collect())
    }

    async fn insert_check(&self, monitor_id: i64, result: &CheckResult) -> Result<i64> {
        self.write_guard()?;
        let mut tables = lock(&self.tables);
        if !tables.monitors.iter().any(|m| m.id == monitor_id) {
            return Err(StoreError::NotFound(monitor_id));
        }
        tables.next_check_id += 1;
        let id = tables.next_check_id;
        tables.checks.push(CheckRecord {
            id,
            monitor_id,
            status: result.status,
            latency_ms: result.latency_ms,
            timestamp: result.timestamp,
        });
        Ok(id)
    }

    async fn update_monitor_state(&self, monitor_id: i64, result: &CheckResult) -> Result<()> {
        self.write_guard()?;
        let mut tables = lock(&self.tables);
        let monitor = tables
            .monitors
            .iter_mut()
            .find(|m| m.id == monitor_id)
            .ok_or(StoreError::NotFound(monitor_id))?;
        monitor.last_check = Some(LastCheck::from(result));
        Ok(())
    }

    async fn add_monitor(&self, new: NewMonitor) -> Result<Monitor> {
        new.validate()?;
        let mut tables = lock(&self.tables);
        tables.next_monitor_id += 1;
        let monitor = Monitor {
            id: tables.next_monitor_id,
            name: new.name,
            url: new.url,
            kind: new.kind,
            active: new.active,
            last_check: None,
        };
        tables.monitors.push(monitor.clone());
        Ok(monitor)
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        Ok(lock(&self.tables).monitors.iter().find(|m| m.id == id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        Ok(lock(&self.tables).monitors.clone())
    }

    async fn delete_monitor(&self, id: i64) -> Result<bool> {
        let mut tables = lock(&self.tables);
        let before = tables.monitors.len();
        tables.monitors.retain(|m| m.id != id);
        tables.checks.retain(|c| c.monitor_id != id);
        Ok(tables.monitors.len() != before)
    }

    async fn recent_checks(&self, monitor_id: i64, limit: usize) -> Result<Vec<CheckRecord>> {
        let tables = lock(&self.tables);
        let mine: Vec<_> = tables
            .checks
            .iter()
            .filter(|c| c.monitor_id == monitor_id)
            .cloned()
            .collect();
        let skip = mine.len().saturating_sub(limit);
        Ok(mine.into_iter().skip(skip).collect())
    }
}

/// A [`Prober`] that replays scripted statuses and can be held at a gate.
///
/// Once the script runs out the last status repeats. With a gate installed,
/// each probe waits for one permit before answering.
pub struct ScriptedProber {
    statuses: Mutex<VecDeque<u16>>,
    last: Mutex<u16>,
    latency_ms: u64,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl ScriptedProber {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            last: Mutex::new(crate::monitor::STATUS_UNREACHABLE),
            latency_ms: 10,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn always(status: u16) -> Self {
        Self::new([status])
    }

    /// Hold every probe until [`ScriptedProber::release`] hands out a permit.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _url: &str, _kind: &ProbeKind) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let status = {
            let mut last = lock(&self.last);
            if let Some(next) = lock(&self.statuses).pop_front() {
                *last = next;
            }
            *last
        };
        ProbeOutcome::new(status, self.latency_ms)
    }
}
