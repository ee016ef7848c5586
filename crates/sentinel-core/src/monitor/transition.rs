use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{CheckResult, Monitor, STATUS_OK};

/// Up/down classification of a single status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    pub fn from_status(status: u16) -> Self {
        if status == STATUS_OK {
            Self::Up
        } else {
            Self::Down
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Direction of an alerting transition: the state the monitor moved into.
pub type Direction = LinkState;

/// Decide whether moving from `prior` to `current` fires an alert.
///
/// `prior == None` means the monitor has never been checked: a first failure
/// alerts, a first success silently sets the baseline. Otherwise only a change
/// of classification alerts, so sustained up or down never repeats.
pub fn evaluate(prior: Option<u16>, current: u16) -> Option<Direction> {
    let next = LinkState::from_status(current);
    match prior.map(LinkState::from_status) {
        None if next == LinkState::Down => Some(LinkState::Down),
        None => None,
        Some(prev) if prev != next => Some(next),
        Some(_) => None,
    }
}

/// Structured alert handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub monitor_id: i64,
    pub monitor_name: String,
    pub target: String,
    pub status: u16,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(monitor: &Monitor, result: &CheckResult, direction: Direction) -> Self {
        Self {
            monitor_id: monitor.id,
            monitor_name: monitor.name.clone(),
            target: monitor.url.clone(),
            status: result.status,
            direction,
            timestamp: result.timestamp,
        }
    }
}
