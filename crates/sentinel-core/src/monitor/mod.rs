pub mod engine;
pub mod model;
pub mod scheduler;
pub mod transition;

pub use engine::{CycleError, CycleOutcome, CycleReport, Engine, TickHandle};
pub use model::{
    CheckResult, InvalidMonitor, LastCheck, Monitor, NewMonitor, ProbeKind, ProbeOutcome,
    STATUS_KEYWORD_MISSING, STATUS_OK, STATUS_UNREACHABLE,
};
pub use scheduler::{delay_until_next_minute, Scheduler};
pub use transition::{evaluate, AlertEvent, Direction, LinkState};
