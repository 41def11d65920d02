//! Pure exponential retry backoff: `delay = base * 2^(retry_count - 1)`,
//! where `retry_count` is the value *after* increment (the 1st retry uses
//! exponent 0, matching the k-th-retry law and the worked examples rather
//! than a literal `2^retry_count` reading — see DESIGN.md).

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base: Duration,
}

impl RetryBackoff {
    pub fn new(base_seconds: f64) -> Self {
        Self {
            base: Duration::from_secs_f64(base_seconds.max(0.0)),
        }
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1) as i32;
        Duration::from_secs_f64(self.base.as_secs_f64() * 2f64.powi(exponent))
    }

    pub fn delay_until(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.delay_for(retry_count))
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new(2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_two_seconds_matches_scenario_2() {
        let backoff = RetryBackoff::new(2.0);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn first_retry_is_base_delay() {
        let backoff = RetryBackoff::new(2.0);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
    }
}
