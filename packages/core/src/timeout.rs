//! Deadline wrapper for external operations.
//!
//! Mount helpers can hang indefinitely on unreachable hosts. Every helper
//! invocation and filesystem probe made by a backend goes through
//! [`with_timeout`] so the caller is never blocked past the deadline.
//!
//! The wrapped future is dropped on expiry. Whether that also kills a spawned
//! helper depends on how the process invoker was configured
//! (see [`EngineConfig::kill_on_timeout`](crate::config::EngineConfig)).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Default ceiling for a single external operation.
pub const OPERATION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Races `operation` against a timer.
///
/// Returns [`Error::Timeout`] carrying `label` if the timer fires first.
pub async fn with_timeout<T, F>(operation: F, limit: Duration, label: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!(label, timeout_ms = limit.as_millis() as u64, "operation timed out");
            Err(Error::Timeout {
                label: label.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let value = with_timeout(async { Ok(7) }, Duration::from_millis(50), "quick")
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_propagates_inner_error() {
        let err = with_timeout::<(), _>(
            async { Err(Error::NotMounted) },
            Duration::from_millis(50),
            "inner",
        )
        .await
        .unwrap_err();
        assert!(err.is_not_mounted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_resolving_operation_times_out() {
        let start = tokio::time::Instant::now();
        let err = with_timeout(
            std::future::pending::<Result<()>>(),
            OPERATION_TIMEOUT,
            "NFS mount",
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "NFS mount timed out");
        assert!(start.elapsed() < OPERATION_TIMEOUT + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_real_clock_deadline() {
        let start = Instant::now();
        let err = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
            Duration::from_millis(20),
            "sleep",
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
