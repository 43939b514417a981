use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::app::{PortalError, Result};

pub const NETWORK_PERMITS: usize = 4;
pub const IMAGE_DOWNLOAD_PERMITS: usize = 20;
pub const IMAGE_DECODE_PERMITS: usize = 4;

/// Counting semaphore bounding one class of work (portal requests, image
/// downloads, image decodes).
///
/// Waiters are woken in arrival order. A permit is returned when the
/// [`OwnedSemaphorePermit`] is dropped. Dropping a pending `acquire` future
/// removes the caller from the queue.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(name: &'static str, permits: usize) -> Self {
        Self {
            name,
            capacity: permits,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        trace!(limiter = self.name, available = self.available(), "acquiring permit");
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PortalError::Cancelled)
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PortalError::Cancelled`] as soon as `cancel` fires.
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return Err(PortalError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PortalError::Cancelled),
            permit = self.acquire() => permit,
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fails every current and future waiter.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release_restores_capacity() {
        let limiter = ConcurrencyLimiter::new("test", 2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_acquire_waits_while_exhausted() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let held = tokio_test::block_on(limiter.acquire()).unwrap();

        let mut waiter = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let _permit = tokio_test::assert_ready_ok!(waiter.poll());
    }

    #[tokio::test]
    async fn test_waiters_wake_in_arrival_order() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let held = limiter.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                order.lock().unwrap().push(i);
                settle().await;
            }));
            settle().await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let held = limiter.acquire().await.unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire_or_cancel(&cancel).await.map(|_| ()) })
        };
        settle().await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(PortalError::Cancelled)));
        drop(held);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_limiter_reports_cancelled() {
        let limiter = ConcurrencyLimiter::new("test", 0);
        limiter.close();
        assert!(matches!(limiter.acquire().await, Err(PortalError::Cancelled)));
    }
}
