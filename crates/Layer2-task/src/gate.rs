//! Concurrency gate - counting permit pool for worker processes
//!
//! A permit is held for the whole lifecycle of one worker process
//! (spawn -> exchange -> reap) and released when the [`GatePermit`] drops,
//! on every exit path.

use mpdispatch_foundation::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Counters {
    held: AtomicUsize,
    peak: AtomicUsize,
}

/// Bounds how many worker processes may be alive at once
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    max: usize,
}

impl ConcurrencyGate {
    /// Create a gate with `max` permits; `max` must be positive
    pub fn new(max: usize) -> Result<Self> {
        if max == 0 {
            return Err(Error::Config(
                "max_processes must be a positive integer".to_string(),
            ));
        }
        if max > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "max_processes {} exceeds the supported maximum of {}",
                max,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max)),
            counters: Arc::new(Counters {
                held: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
            max,
        })
    }

    /// Wait for a free permit
    ///
    /// Only suspends the caller; waiters are served in FIFO order.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("concurrency gate closed".to_string()))?;

        let held = self.counters.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(held, Ordering::SeqCst);

        Ok(GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Configured maximum
    pub fn max(&self) -> usize {
        self.max
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.counters.held.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// One held slot; dropping it frees the slot
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.held.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_is_rejected() {
        assert!(matches!(ConcurrencyGate::new(0), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_permits_are_counted_and_released() {
        let gate = ConcurrencyGate::new(2).unwrap();

        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.in_use(), 1);
        drop(b);
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.peak(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(gate.peak(), 1);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_when_holder_fails() {
        let gate = ConcurrencyGate::new(1).unwrap();

        let outcome: Result<()> = async {
            let _permit = gate.acquire().await?;
            Err(Error::Worker("spawn failed".into()))
        }
        .await;

        assert!(outcome.is_err());
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.available(), 1);
    }
}
