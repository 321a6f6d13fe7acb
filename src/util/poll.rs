//! Bounded retry-until-condition polling.
//!
//! Distinct from the reconciliation scheduler: this is the small helper
//! controllers and tests use to await an external condition (a status
//! converging, a file appearing) under an overall deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{Error, Result};

/// Poll `attempt` every `interval` until it yields a value or `deadline`
/// elapses.
///
/// `attempt` returns `Ok(Some(value))` when the condition is met,
/// `Ok(None)` to keep waiting, or `Err` to abort immediately on a hard
/// failure. Expiry surfaces as [`Error::Timeout`].
pub async fn until<T, F, Fut>(deadline: Duration, interval: Duration, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }

        if started.elapsed() + interval > deadline {
            return Err(Error::timeout(format!(
                "condition not met within {:?}",
                deadline
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_value_once_condition_met() {
        let attempts = AtomicU32::new(0);
        let value = until(Duration::from_secs(5), Duration::from_millis(1), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) >= 3 {
                Ok(Some("ready"))
            } else {
                Ok(None)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout() {
        let result: Result<()> = until(
            Duration::from_millis(20),
            Duration::from_millis(5),
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn hard_errors_abort_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::internal("broken"))
            },
        )
        .await;

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
