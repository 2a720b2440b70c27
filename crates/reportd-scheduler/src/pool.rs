//! Bounded worker pool. Caps how many executions run at once.
//!
//! Spawning is unbounded; an execution waits for a slot before entering the
//! pipeline and frees it when the slot guard drops.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct Counters {
    active: AtomicUsize,
    total_processed: AtomicU64,
}

/// Shared handle to the pool; clones refer to the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    counters: Arc<Counters>,
}

/// A held slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.total_processed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
}

impl WorkerPool {
    /// A pool with `max_concurrent` slots (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            counters: Arc::new(Counters {
                active: AtomicUsize::new(0),
                total_processed: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for a free slot. `None` only if the semaphore was closed.
    pub async fn acquire(&self) -> Option<WorkerSlot> {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        Some(WorkerSlot {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.counters.active.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
            total_processed: self.counters.total_processed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let pool = WorkerPool::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let peak = peak.clone();
            let running = running.clone();
            handles.push(tokio::spawn(async move {
                let _slot = pool.acquire().await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_processed, 8);
        assert_eq!(stats.max_concurrent, 2);
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let pool = WorkerPool::new(1);
        let slot = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active, 1);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(slot);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_capacity_means_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.stats().max_concurrent, 1);
        let _slot = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active, 1);
    }
}
