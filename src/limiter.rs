//! Bounded admission for external invocations.
//!
//! The limiter is the only shared mutable resource in the core. Each call
//! that reaches an invoker acquires an `ExecutionSlot` before the external
//! call starts and holds it for the duration; the slot is an owned semaphore
//! permit, so release happens exactly once on every exit path, including
//! timeout and panic unwind. `tokio::sync::Semaphore` queues waiters in FIFO
//! order, which is enough to rule out starvation under steady load.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ServiceError;

/// Admission ticket for one external invocation. Capacity returns when the
/// slot is dropped.
#[derive(Debug)]
pub struct ExecutionSlot {
    _permit: OwnedSemaphorePermit,
}

/// Bounds the number of concurrent external invocations.
#[derive(Debug, Clone)]
pub struct ExecutionLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ExecutionLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Suspend until fewer than `max_concurrent` executions are outstanding,
    /// then return a slot. Waiters are admitted in FIFO order.
    pub async fn acquire(&self) -> Result<ExecutionSlot, ServiceError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::External("execution limiter closed".to_string()))?;
        Ok(ExecutionSlot { _permit: permit })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Race an operation against a deadline.
///
/// On expiry the operation's future is dropped, cancelling the underlying
/// work, and a `Timeout` error is reported; partial output is discarded.
pub async fn with_timeout<F, T>(deadline: Duration, operation: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_acquire_and_release_restores_capacity() {
        let limiter = ExecutionLimiter::new(2);
        assert_eq!(limiter.available(), 2);

        let slot = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 1);

        drop(slot);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_concurrent() {
        let limiter = ExecutionLimiter::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _slot = limiter.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_slot_released_on_panic() {
        let limiter = ExecutionLimiter::new(1);
        let inner = limiter.clone();

        let handle = tokio::spawn(async move {
            let _slot = inner.acquire().await.unwrap();
            panic!("boom");
        });
        assert!(handle.await.is_err());

        // The permit came back despite the unwind.
        assert_eq!(limiter.available(), 1);
        let _slot = limiter.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async {
            Ok::<_, ServiceError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expiry() {
        let result = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_propagates_inner_error() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(ServiceError::External("inner".to_string()))
        })
        .await;
        assert!(matches!(result, Err(ServiceError::External(_))));
    }
}
