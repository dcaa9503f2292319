//! Dispatch pacing against the upstream quota.

use std::time::{Duration, Instant};

/// Sleep granularity while waiting out the dispatch interval.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pace interval for N active transports: one request every `60/N + 1`
/// seconds. This is a global floor on the aggregate dispatch rate, not a
/// per-transport limit; it holds even for a single transport.
pub fn dispatch_interval(transports: usize) -> Duration {
    Duration::from_secs_f64(60.0 / transports as f64 + 1.0)
}

/// Wait until `interval` has passed since `last`, returning the instant
/// the caller should record as this dispatch's start.
///
/// The first call (no `last`) returns immediately.
pub async fn wait(last: Option<Instant>, interval: Duration) -> Instant {
    let Some(last) = last else {
        return Instant::now();
    };
    loop {
        let now = Instant::now();
        if now.duration_since(last) >= interval {
            return now;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_scales_with_transport_count() {
        assert_eq!(dispatch_interval(1), Duration::from_secs(61));
        assert_eq!(dispatch_interval(3), Duration::from_secs(21));
        assert_eq!(dispatch_interval(6), Duration::from_secs(11));
    }

    #[tokio::test]
    async fn first_call_returns_immediately() {
        let before = Instant::now();
        let started = wait(None, Duration::from_secs(60)).await;
        assert!(started.duration_since(before) < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn waits_out_the_interval() {
        let interval = Duration::from_millis(300);
        let last = wait(None, interval).await;
        let next = wait(Some(last), interval).await;
        assert!(next.duration_since(last) >= interval);
    }
}
