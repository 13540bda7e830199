//! Debounced batch hand-off from the pending queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::PendingQueue;
use crate::Result;
use crate::domain::RawLibraryEvent;

/// Consumer of one drained batch.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    async fn process(&self, batch: Vec<RawLibraryEvent>) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    /// How often the queue is checked for pending events.
    pub poll_interval: Duration,
    /// Delay between noticing pending events and draining them.
    pub debounce_window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            debounce_window: Duration::from_secs(15),
        }
    }
}

/// Background loop that turns bursts of events into batches.
pub struct DebounceScheduler {
    queue: Arc<PendingQueue>,
    processor: Arc<dyn BatchProcessor>,
    config: DebounceConfig,
}

impl DebounceScheduler {
    pub fn new(
        queue: Arc<PendingQueue>,
        processor: Arc<dyn BatchProcessor>,
        config: DebounceConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Poll until cancelled. Events still pending at cancellation are processed once
    /// before returning.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            debounce_secs = self.config.debounce_window.as_secs(),
            "Library debounce loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.queue.is_empty() {
                continue;
            }

            debug!(pending = self.queue.len(), "Library events pending, waiting out debounce window");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.debounce_window) => {}
            }

            self.run_cycle().await;
        }

        // Whatever is still pending goes out once; the queue is not persisted.
        let flushed = self.run_cycle().await;
        info!(flushed, "Library debounce loop stopped");
    }

    /// Drain the queue and process the batch in its own task.
    ///
    /// Returns the batch size. Errors and panics are logged, never propagated.
    pub async fn run_cycle(&self) -> usize {
        let batch = self.queue.drain();
        if batch.is_empty() {
            return 0;
        }
        let size = batch.len();

        let processor = self.processor.clone();
        let handle = tokio::spawn(async move { processor.process(batch).await });

        match handle.await {
            Ok(Ok(())) => debug!(size, "Library batch processed"),
            Ok(Err(e)) => error!(size, error = %e, kind = e.kind(), "Library batch failed"),
            Err(e) if e.is_panic() => error!(size, "Library batch panicked"),
            Err(e) => warn!(size, error = %e, "Library batch task cancelled"),
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailFirst,
        PanicFirst,
    }

    struct RecordingProcessor {
        tx: mpsc::UnboundedSender<Vec<String>>,
        calls: AtomicU32,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl BatchProcessor for RecordingProcessor {
        async fn process(&self, batch: Vec<RawLibraryEvent>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.tx.send(batch.into_iter().map(|e| e.id).collect());
            match (self.behaviour, call) {
                (Behaviour::FailFirst, 0) => Err(crate::Error::Other("boom".to_string())),
                (Behaviour::PanicFirst, 0) => panic!("processor panicked"),
                _ => Ok(()),
            }
        }
    }

    fn setup(
        behaviour: Behaviour,
    ) -> (
        Arc<PendingQueue>,
        DebounceScheduler,
        mpsc::UnboundedReceiver<Vec<String>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(PendingQueue::new());
        let processor = Arc::new(RecordingProcessor {
            tx,
            calls: AtomicU32::new(0),
            behaviour,
        });
        let scheduler = DebounceScheduler::new(queue.clone(), processor, DebounceConfig::default());
        (queue, scheduler, rx)
    }

    fn event(id: &str) -> RawLibraryEvent {
        RawLibraryEvent::new(id, ItemKind::Episode, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_becomes_one_batch_after_window() {
        let (queue, scheduler, mut rx) = setup(Behaviour::Succeed);
        let cancel = CancellationToken::new();
        let started = Instant::now();

        queue.enqueue(event("1"));
        queue.enqueue(event("2"));
        let handle = scheduler.spawn(cancel.clone());
        queue.enqueue(event("3"));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch, vec!["1", "2", "3"]);
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(queue.is_empty());

        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_does_not_stop_loop() {
        let (queue, scheduler, mut rx) = setup(Behaviour::FailFirst);
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        queue.enqueue(event("a"));
        assert_eq!(rx.recv().await.unwrap(), vec!["a"]);

        queue.enqueue(event("b"));
        assert_eq!(rx.recv().await.unwrap(), vec!["b"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_batch_does_not_stop_loop() {
        let (queue, scheduler, mut rx) = setup(Behaviour::PanicFirst);
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        queue.enqueue(event("a"));
        assert_eq!(rx.recv().await.unwrap(), vec!["a"]);

        queue.enqueue(event("b"));
        assert_eq!(rx.recv().await.unwrap(), vec!["b"]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_window_flushes_pending_batch() {
        let (queue, scheduler, mut rx) = setup(Behaviour::Succeed);
        let cancel = CancellationToken::new();
        queue.enqueue(event("late"));
        let handle = scheduler.spawn(cancel.clone());

        // Past the first poll, inside the debounce window.
        sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_run_cycle_on_empty_queue() {
        let (_queue, scheduler, _rx) = setup(Behaviour::Succeed);
        assert_eq!(scheduler.run_cycle().await, 0);
    }
}
