#![forbid(unsafe_code)]

pub mod config;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod store;
pub mod testing;

pub use config::{EngineConfig, TICK_INTERVAL};
pub use monitor::{
    evaluate, AlertEvent, CheckResult, CycleError, CycleOutcome, CycleReport, Direction, Engine,
    InvalidMonitor, LastCheck, LinkState, Monitor, NewMonitor, ProbeKind, ProbeOutcome, Scheduler,
    TickHandle,
};
pub use notify::{
    alert_channel, AlertChannel, AlertDispatcher, AlertMessage, EmailChannel, EmailConfig,
    NotifyError, TelegramChannel, TelegramConfig, WebhookChannel, WebhookConfig,
};
pub use probe::{Prober, ProbeSet, RetryPolicy};
pub use store::{CheckRecord, MonitorStore, SqliteStore, StoreError};
