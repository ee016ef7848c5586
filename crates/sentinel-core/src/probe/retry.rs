use std::future::Future;
use std::time::Duration;

use tracing::info;

use crate::config::EngineConfig;
use crate::monitor::ProbeOutcome;

/// Linear-backoff retry around a probe.
///
/// Runs up to `1 + max_retries` attempts and stops at the first up outcome.
/// Retry `n` (1-based) waits `n * backoff_step` first. The returned outcome
/// is from the last attempt made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_retries, config.retry_backoff)
    }

    /// `attempt` receives the 1-based attempt number.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> ProbeOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProbeOutcome>,
    {
        let mut attempt_no = 1;
        let mut outcome = attempt(attempt_no).await;

        while !outcome.is_up() && attempt_no <= self.max_retries {
            let wait = self.backoff_step * attempt_no;
            info!(
                attempt = attempt_no + 1,
                max_attempts = self.max_retries + 1,
                last_status = outcome.status,
                wait_ms = wait.as_millis() as u64,
                "Retrying check"
            );
            tokio::time::sleep(wait).await;
            attempt_no += 1;
            outcome = attempt(attempt_no).await;
        }

        outcome
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn scripted(statuses: Vec<u16>) -> (Arc<Mutex<Vec<(u32, Instant)>>>, impl FnMut(u32) -> std::future::Ready<ProbeOutcome>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let attempt = move |n: u32| {
            log.lock().unwrap().push((n, Instant::now()));
            let status = statuses[(n as usize - 1).min(statuses.len() - 1)];
            std::future::ready(ProbeOutcome::new(status, 5))
        };
        (calls, attempt)
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_makes_one_attempt() {
        let (calls, attempt) = scripted(vec![200]);
        let outcome = RetryPolicy::default().run(attempt).await;
        assert_eq!(outcome.status, 200);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_waits_2s_then_4s() {
        let (calls, attempt) = scripted(vec![500, 500, 503]);
        let start = Instant::now();
        let outcome = RetryPolicy::default().run(attempt).await;

        assert_eq!(outcome.status, 503);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1 - start, Duration::ZERO);
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(2));
        assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let (calls, attempt) = scripted(vec![0, 200, 500]);
        let outcome = RetryPolicy::default().run(attempt).await;
        assert_eq!(outcome.status, 200);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_makes_single_attempt() {
        let (calls, attempt) = scripted(vec![0]);
        let outcome = RetryPolicy::new(0, Duration::from_secs(2)).run(attempt).await;
        assert_eq!(outcome.status, 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }
}
