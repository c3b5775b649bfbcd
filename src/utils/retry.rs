//! Backoff for caller-side retries.
//!
//! Uses `backon` for exponential backoff with jitter. The bus core never
//! retries on its own; processes that start before the proxy use this to
//! keep dialing until it appears.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for dialing the bus proxy at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn dial_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Short backoff for tests and tools that should give up quickly.
pub fn quick_backoff(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(100))
        .with_max_times(max_times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::Retryable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_quick_backoff_gives_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), &str> = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("refused")
        })
        .retry(quick_backoff(3))
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_dial_backoff_retries_until_success() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, &str> = (|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet")
            } else {
                Ok(n)
            }
        })
        .retry(dial_backoff())
        .await;

        assert_eq!(result, Ok(2));
    }
}
