//! Condition polling used in place of fixed sleeps.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `probe` every `interval` until it returns `true` or `timeout` elapses.
///
/// The probe always runs at least once. Returns whether the condition held
/// before the deadline.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_until_succeeds_after_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let ok = poll_until(Duration::from_secs(1), Duration::from_millis(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let ok = poll_until(Duration::from_millis(20), Duration::from_millis(5), || async {
            false
        })
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_zero_timeout_probes_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let ok = poll_until(Duration::ZERO, Duration::from_millis(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
