use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::TICK_INTERVAL;
use crate::monitor::engine::Engine;

/// Time from `now` until the start of the next wall-clock minute.
pub fn delay_until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = Duration::new(
        now.timestamp().rem_euclid(60) as u64,
        now.timestamp_subsec_nanos(),
    );
    TICK_INTERVAL.saturating_sub(into_minute)
}

/// Fires [`Engine::tick`] once per interval until shut down.
///
/// By default ticks land on minute boundaries, like a `* * * * *` cron
/// entry. Ticks missed while the runtime was busy are skipped, not replayed.
pub struct Scheduler {
    engine: Engine,
    interval: Duration,
    align_to_minute: bool,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            interval: TICK_INTERVAL,
            align_to_minute: true,
        }
    }

    /// Tick every `interval`, starting one interval from now.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.align_to_minute = false;
        self
    }

    fn first_tick(&self) -> Instant {
        let delay = if self.align_to_minute {
            delay_until_next_minute(Utc::now())
        } else {
            self.interval
        };
        Instant::now() + delay
    }

    /// Run until `shutdown` resolves. Cycles already launched keep running.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval_at(self.first_tick(), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.interval.as_secs(),
            aligned = self.align_to_minute,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.engine.tick().await {
                    Ok(handle) => debug!(launched = handle.len(), "Tick dispatched"),
                    Err(e) => error!(error = %e, "Failed to load active monitors"),
                },
            }
        }

        info!("Scheduler stopped");
    }

    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run(shutdown))
    }
}
