//! Capped exponential backoff for the blocking `get` contract (spec §6,
//! "Get"; §4.5, `Reply::NoWork` is "not an error... expected to poll
//! again"). There is no push channel from server back to an idle worker
//! in this transport — a blocking `get` is a polling loop on the caller's
//! side, not a held-open connection — so the retry cadence lives here
//! rather than in `dflow-net`. Modeled on the exponential-with-jitter
//! strategy the workflow engine's connector layer uses for retrying
//! flaky I/O.

use std::time::Duration;

use tokio::time::sleep;

/// `delay = base * multiplier^attempt`, capped at `max_delay`, with up to
/// 25% jitter so many idle workers polling the same server don't all
/// retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct PollBackoff {
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        PollBackoff {
            base: Duration::from_millis(5),
            multiplier: 1.5,
            max_delay: Duration::from_millis(250),
        }
    }
}

impl PollBackoff {
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        PollBackoff { base, multiplier, max_delay }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let millis = (self.base.as_millis() as f64) * self.multiplier.powi(attempt as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(capped)
    }

    fn with_jitter(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        let range_ms = (base.as_millis() / 4).max(1) as u64;
        let jitter = rand::random::<u64>() % (range_ms * 2);
        let adjusted = base.as_millis() as u64 + jitter.saturating_sub(range_ms);
        Duration::from_millis(adjusted)
    }

    /// Sleep for this attempt's backoff duration.
    pub async fn wait(&self, attempt: u32) {
        sleep(self.with_jitter(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps() {
        let b = PollBackoff::new(Duration::from_millis(10), 2.0, Duration::from_millis(100));
        assert_eq!(b.delay_for(0), Duration::from_millis(10));
        assert_eq!(b.delay_for(1), Duration::from_millis(20));
        assert_eq!(b.delay_for(2), Duration::from_millis(40));
        assert_eq!(b.delay_for(10), Duration::from_millis(100));
    }
}
