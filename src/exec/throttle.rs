// src/exec/throttle.rs

//! Request pacing: minimum spacing between outbound actions and
//! exponential backoff between retries, both with random jitter.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::ExecutorSection;

#[derive(Debug, Clone)]
pub struct Throttle {
    spacing: Duration,
    jitter: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    last_request: Option<Instant>,
}

impl Throttle {
    pub fn new(settings: &ExecutorSection) -> Self {
        Self {
            spacing: Duration::from_millis(settings.request_spacing_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            last_request: None,
        }
    }

    /// Sleep until the spacing since the previous request has passed, then
    /// record this request.
    pub async fn wait_turn(&mut self) {
        if let Some(last) = self.last_request {
            let due = last + self.spacing + random_up_to(self.jitter);
            let now = Instant::now();
            if due > now {
                trace!(wait_ms = (due - now).as_millis() as u64, "spacing requests");
                tokio::time::sleep_until(due).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Delay before retry number `retry` (1-based): base doubled per retry,
    /// capped, plus jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        backoff_delay(retry, self.backoff_base, self.backoff_max) + random_up_to(self.jitter)
    }
}

/// Jitter-free part of the backoff.
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }
    let doublings = (retry - 1).min(16);
    base.saturating_mul(1 << doublings).min(max)
}

fn random_up_to(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    max.mul_f64(rand::random::<f64>())
}
