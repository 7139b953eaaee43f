use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::{LeaseError, Result};

/// Index of a slot in a [`WorkerPool`].
pub type SlotId = usize;

/// Bounded set of reusable execution slots.
///
/// The first `capacity` submissions each get a fresh slot. After that, slots
/// are reused round-robin and a submission first waits for the
/// least-recently-assigned slot to finish. That wait is the pool's only
/// back-pressure.
///
/// A task that fails does not return its error through the slot. The error is
/// forwarded to [`WorkerPool::next_fatal`] so the owner can stop right away.
pub struct WorkerPool {
    capacity: usize,
    slots: Vec<JoinHandle<()>>,
    cursor: SlotId,
    in_flight: Arc<AtomicUsize>,
    fatal_tx: mpsc::UnboundedSender<LeaseError>,
    fatal_rx: mpsc::UnboundedReceiver<LeaseError>,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            capacity: capacity.max(1),
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            fatal_tx,
            fatal_rx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Slots holding a task that has not been joined yet.
    pub fn occupied(&self) -> usize {
        self.slots.len()
    }

    /// Runs `task` in a slot, waiting for the oldest slot when all are taken.
    pub async fn submit<F>(&mut self, task: F) -> Result<SlotId>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let slot = if self.slots.len() < self.capacity {
            self.slots.len()
        } else {
            let slot = (self.cursor + 1) % self.capacity;
            tracing::trace!(slot, "pool saturated, joining oldest slot");
            Self::join(slot, &mut self.slots[slot]).await?;
            slot
        };

        let handle = tokio::spawn(Self::run_slot(
            slot,
            task,
            self.in_flight.clone(),
            self.fatal_tx.clone(),
        ));
        if slot == self.slots.len() {
            self.slots.push(handle);
        } else {
            self.slots[slot] = handle;
        }
        self.cursor = slot;
        Ok(slot)
    }

    async fn run_slot<F>(
        slot: SlotId,
        task: F,
        in_flight: Arc<AtomicUsize>,
        fatal: mpsc::UnboundedSender<LeaseError>,
    ) where
        F: Future<Output = Result<()>>,
    {
        let _in_flight = InFlight::enter(in_flight);
        if let Err(e) = task.await {
            tracing::error!(slot, error = %e, "worker slot failed");
            let _ = fatal.send(e);
        }
    }

    async fn join(slot: SlotId, handle: &mut JoinHandle<()>) -> Result<()> {
        handle.await.map_err(|source| {
            tracing::error!(slot, error = %source, "worker slot panicked");
            LeaseError::TaskJoin {
                operation: "worker slot",
                source,
            }
        })
    }

    /// Waits for the next error reported by a task.
    pub async fn next_fatal(&mut self) -> Option<LeaseError> {
        self.fatal_rx.recv().await
    }

    /// Joins every outstanding slot.
    ///
    /// Returns the first failure seen by any task, including ones that failed
    /// while draining.
    pub async fn drain_all(&mut self) -> Result<()> {
        let handles: Vec<_> = self.slots.drain(..).collect();
        self.cursor = 0;
        let joined = futures::future::join_all(handles).await;

        if let Ok(e) = self.fatal_rx.try_recv() {
            return Err(e);
        }
        for result in joined {
            result.map_err(|source| LeaseError::TaskJoin {
                operation: "worker slot",
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fills_fresh_slots_then_cycles() {
        let mut pool = WorkerPool::new(3);
        let mut assigned = Vec::new();
        for _ in 0..7 {
            assigned.push(pool.submit(async { Ok(()) }).await.unwrap());
        }
        assert_eq!(assigned, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(pool.occupied(), 3);
        pool.drain_all().await.unwrap();
        assert_eq!(pool.occupied(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_capacity() {
        let mut pool = WorkerPool::new(4);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..40 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
            assert!(pool.in_flight() <= pool.capacity());
        }
        pool.drain_all().await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn saturated_submit_waits_for_the_oldest_slot() {
        let mut pool = WorkerPool::new(1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(async move {
            let _ = release_rx.await;
            Ok(())
        })
        .await
        .unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), pool.submit(async { Ok(()) }))
            .await;
        assert!(blocked.is_err(), "submit must wait while the only slot is busy");

        release_tx.send(()).unwrap();
        pool.submit(async { Ok(()) }).await.unwrap();
        pool.drain_all().await.unwrap();
    }

    #[tokio::test]
    async fn task_errors_surface_as_fatal() {
        let mut pool = WorkerPool::new(2);
        pool.submit(async {
            Err(LeaseError::ChannelClosed {
                channel: "/client_1".to_string(),
            })
        })
        .await
        .unwrap();

        let fatal = pool.next_fatal().await.expect("error reported");
        assert!(matches!(fatal, LeaseError::ChannelClosed { .. }));
        pool.drain_all().await.unwrap();
    }

    #[tokio::test]
    async fn drain_reports_failures() {
        let mut pool = WorkerPool::new(2);
        pool.submit(async {
            tokio::task::yield_now().await;
            Err(LeaseError::UnknownRequestKind(3))
        })
        .await
        .unwrap();
        assert!(matches!(
            pool.drain_all().await,
            Err(LeaseError::UnknownRequestKind(3))
        ));
    }

    #[tokio::test]
    async fn panics_are_reported_when_joined() {
        let mut pool = WorkerPool::new(1);
        pool.submit(async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap();
        assert!(matches!(
            pool.drain_all().await,
            Err(LeaseError::TaskJoin { .. })
        ));
    }
}
