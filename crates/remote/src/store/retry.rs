//! Bounded retry for store calls.
//!
//! Retry applies at the store-call boundary only. A CAS write that came back
//! with a mismatch is a real conflict, never retried; the `when` predicate
//! below enforces that by only re-attempting [`Error::is_transient`] failures.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use super::Error;

/// Base delay before the first re-attempt.
const BASE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on any single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Total attempts, counting the first.
const MAX_ATTEMPTS: usize = 6;

/// Run `op` with exponential backoff and full jitter.
///
/// `what` names the operation for diagnostics. The final error is returned
/// unchanged once the attempt budget is exhausted.
pub async fn with_retry<T, F, Fut>(what: &str, op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    op.retry(
        ExponentialBuilder::default()
            .with_min_delay(BASE_DELAY)
            .with_max_delay(MAX_DELAY)
            .with_max_times(MAX_ATTEMPTS - 1)
            .with_jitter(),
    )
    .when(Error::is_transient)
    .notify(|err, after| {
        tracing::warn!(
            message = "retrying store call",
            call = what,
            delay_ms = after.as_millis() as u64,
            error = %err,
        );
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;
    use crate::store::BlobStore;

    #[tokio::test]
    async fn transient_failures_are_retried() -> Result<(), Error> {
        let store = MemoryStore::new();
        store.put_overwrite("/x", b"1").await?;
        store.inject_transient(2);

        let (data, _) = with_retry("get /x", || store.get("/x")).await?;
        assert_eq!(data, b"1");
        Ok(())
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() -> Result<(), Error> {
        let store = MemoryStore::new();
        store.put_overwrite("/x", b"1").await?;

        let err = with_retry("create /x", || store.put_create("/x", b"2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        // A conflict consumes exactly one call; nothing was overwritten.
        let (data, _) = store.get("/x").await?;
        assert_eq!(data, b"1");
        Ok(())
    }
}
