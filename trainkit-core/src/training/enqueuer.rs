//! Ordered batch prefetching.
//!
//! Workers claim batch indices in increasing order and build batches on the
//! blocking pool. Each claimed index holds a semaphore permit until the
//! consumer takes its batch, so at most `max_queue_size` batches are ever in
//! flight. Out-of-order arrivals wait in a reorder buffer.

use crate::error::FitError;
use crate::training::model::BatchGenerator;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Delivery<B> = (usize, Result<B, FitError>, OwnedSemaphorePermit);

/// One epoch's worth of batches from a generator, delivered in index order.
pub struct OrderedEnqueuer<B> {
    rx: mpsc::Receiver<Delivery<B>>,
    pending: BTreeMap<usize, (Result<B, FitError>, OwnedSemaphorePermit)>,
    next: usize,
    len: usize,
    stop: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<B: Send + 'static> OrderedEnqueuer<B> {
    /// Start `workers` prefetch tasks over the full length of `generator`.
    /// Must be called from within a Tokio runtime.
    pub fn start<G>(generator: Arc<G>, workers: usize, max_queue_size: usize) -> Self
    where
        G: BatchGenerator<Batch = B>,
    {
        let len = generator.len();
        let max_queue_size = max_queue_size.max(1);
        let (tx, rx) = mpsc::channel(max_queue_size);
        let permits = Arc::new(Semaphore::new(max_queue_size));
        let cursor = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let workers = (0..workers.max(1).min(len.max(1)))
            .map(|worker| {
                let generator = Arc::clone(&generator);
                let permits = Arc::clone(&permits);
                let cursor = Arc::clone(&cursor);
                let tx = tx.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    loop {
                        let permit = tokio::select! {
                            _ = stop.cancelled() => break,
                            permit = Arc::clone(&permits).acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            },
                        };
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        if index >= len {
                            break;
                        }
                        let source = Arc::clone(&generator);
                        let result = tokio::task::spawn_blocking(move || source.get(index))
                            .await
                            .unwrap_or_else(|e| Err(FitError::Worker(e.to_string())));
                        if tx.send((index, result, permit)).await.is_err() {
                            break;
                        }
                    }
                    tracing::trace!(worker, "Prefetch worker finished");
                })
            })
            .collect();

        Self {
            rx,
            pending: BTreeMap::new(),
            next: 0,
            len,
            stop,
            workers,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Batches already built but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.pending.len() + self.rx.len()
    }

    /// The next batch in index order, `None` once the epoch is exhausted.
    pub async fn next(&mut self) -> Option<Result<B, FitError>> {
        if self.next >= self.len {
            return None;
        }
        loop {
            if let Some((result, permit)) = self.pending.remove(&self.next) {
                self.next += 1;
                drop(permit);
                return Some(result);
            }
            match self.rx.recv().await {
                Some((index, result, permit)) => {
                    self.pending.insert(index, (result, permit));
                }
                None => {
                    let index = self.next;
                    self.next = self.len;
                    return Some(Err(FitError::Worker(format!(
                        "prefetch workers exited before delivering batch {index}"
                    ))));
                }
            }
        }
    }
}

impl<B> Drop for OrderedEnqueuer<B> {
    fn drop(&mut self) {
        self.stop.cancel();
        for worker in &self.workers {
            if !worker.is_finished() {
                worker.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Numbers {
        len: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_at: Option<usize>,
        seen: Mutex<Vec<usize>>,
    }

    impl Numbers {
        fn new(len: usize) -> Self {
            Self {
                len,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_at: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl BatchGenerator for Numbers {
        type Batch = usize;

        fn len(&self) -> usize {
            self.len
        }

        fn get(&self, index: usize) -> Result<usize, FitError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Later indices finish first to exercise reordering.
            std::thread::sleep(Duration::from_millis(((self.len - index) % 4) as u64));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(index);
            if self.fail_at == Some(index) {
                return Err(FitError::batch(index, "corrupt sample"));
            }
            Ok(index * 10)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batches_arrive_in_order() {
        let generator = Arc::new(Numbers::new(37));
        let mut enqueuer = OrderedEnqueuer::start(Arc::clone(&generator), 4, 10);

        let mut received = Vec::new();
        while let Some(batch) = enqueuer.next().await {
            received.push(batch.unwrap());
        }

        assert_eq!(received, (0..37).map(|i| i * 10).collect::<Vec<_>>());
        assert!(generator.peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(generator.seen.lock().unwrap().len(), 37);
    }

    #[tokio::test]
    async fn test_queue_depth_bounds_prefetch() {
        let generator = Arc::new(Numbers::new(50));
        let mut enqueuer = OrderedEnqueuer::start(Arc::clone(&generator), 4, 3);

        assert_eq!(enqueuer.next().await.unwrap().unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // One consumed plus at most three claimed ahead.
        assert!(generator.seen.lock().unwrap().len() <= 4);
        assert!(enqueuer.buffered() <= 3);
    }

    #[tokio::test]
    async fn test_generator_error_is_delivered_in_place() {
        let mut numbers = Numbers::new(5);
        numbers.fail_at = Some(2);
        let mut enqueuer = OrderedEnqueuer::start(Arc::new(numbers), 2, 4);

        assert!(enqueuer.next().await.unwrap().is_ok());
        assert!(enqueuer.next().await.unwrap().is_ok());
        match enqueuer.next().await.unwrap() {
            Err(FitError::Batch { index, .. }) => assert_eq!(index, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_generator() {
        let mut enqueuer = OrderedEnqueuer::start(Arc::new(Numbers::new(0)), 4, 10);
        assert!(enqueuer.is_empty());
        assert!(enqueuer.next().await.is_none());
    }
}
