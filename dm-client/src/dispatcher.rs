//! Per-capability action dispatcher
//!
//! Each dispatcher owns one worker thread draining a bounded FIFO queue.
//! Events are processed one at a time, so concurrent requests against the
//! same capability are serialized in arrival order.
//!
//! Shutdown is cooperative: a stop flag is raised and a sentinel queued.
//! Anything still queued once the flag is up is handed to
//! [`ActionWorker::cancel`] instead of being executed. The caller waits for
//! the worker with a bounded timeout.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

use crate::error::{Capability, DispatchError};

/// Processes the events of one capability on its worker thread
pub trait ActionWorker: Send + 'static {
    type Event: Send + fmt::Debug + 'static;

    /// Execute one event; panics are caught and logged by the dispatcher
    fn process(&mut self, event: Self::Event);

    /// Report an event discarded during shutdown
    fn cancel(&mut self, event: Self::Event);
}

enum Envelope<E> {
    Work(E),
    Stop,
}

/// Cloneable submission side of a dispatcher
pub struct DispatchHandle<E> {
    capability: Capability,
    tx: Sender<Envelope<E>>,
    stopped: Arc<AtomicBool>,
}

impl<E> Clone for DispatchHandle<E> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability,
            tx: self.tx.clone(),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

impl<E: Send + fmt::Debug + 'static> DispatchHandle<E> {
    /// Queue an event without blocking
    pub fn submit(&self, event: E) -> Result<(), DispatchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DispatchError::Stopped(self.capability));
        }
        match self.tx.try_send(Envelope::Work(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull(self.capability)),
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::Stopped(self.capability)),
        }
    }

    /// Whether another event would currently be accepted
    pub fn has_capacity(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.tx.is_full()
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }
}

/// Owner of a capability's worker thread
pub struct ActionDispatcher<E> {
    handle: DispatchHandle<E>,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    cancelled: Arc<AtomicU64>,
}

impl<E: Send + fmt::Debug + 'static> ActionDispatcher<E> {
    /// Spawn the worker thread `dm-<capability>-worker`
    pub fn start<W>(capability: Capability, capacity: usize, worker: W) -> Result<Self, DispatchError>
    where
        W: ActionWorker<Event = E>,
    {
        let (tx, rx) = bounded(capacity);
        let (done_tx, done_rx) = bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicU64::new(0));

        let worker_stopped = Arc::clone(&stopped);
        let worker_cancelled = Arc::clone(&cancelled);
        let join = thread::Builder::new()
            .name(format!("dm-{}-worker", capability))
            .spawn(move || {
                let _done = DoneSignal(done_tx);
                run_worker(capability, worker, rx, worker_stopped, worker_cancelled);
            })
            .map_err(|_| DispatchError::Spawn(capability))?;

        tracing::debug!("Started {} dispatcher (capacity {})", capability, capacity);

        Ok(Self {
            handle: DispatchHandle {
                capability,
                tx,
                stopped,
            },
            done_rx,
            worker: Some(join),
            cancelled,
        })
    }

    pub fn handle(&self) -> DispatchHandle<E> {
        self.handle.clone()
    }

    pub fn submit(&self, event: E) -> Result<(), DispatchError> {
        self.handle.submit(event)
    }

    pub fn capability(&self) -> Capability {
        self.handle.capability
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.stopped.load(Ordering::SeqCst)
    }

    /// Number of events discarded by shutdown so far
    pub fn cancelled_count(&self) -> u64 {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop the worker, waiting at most `timeout`
    ///
    /// Idempotent. On timeout the worker is detached; it will still discard
    /// every queued event once its current handler call returns.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<(), DispatchError> {
        let capability = self.handle.capability;
        self.handle.stopped.store(true, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // Called from a handler on this worker: the loop exits after returning
        if worker.thread().id() == thread::current().id() {
            let _ = self.handle.tx.try_send(Envelope::Stop);
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        match self.handle.tx.send_timeout(Envelope::Stop, timeout) {
            Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!("{} dispatcher queue did not accept stop sentinel", capability);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done_rx.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                tracing::debug!("{} dispatcher stopped", capability);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("{} worker did not stop within {:?}", capability, timeout);
                Err(DispatchError::ShutdownTimedOut {
                    capability,
                    timeout,
                })
            }
        }
    }
}

impl<E> Drop for ActionDispatcher<E> {
    fn drop(&mut self) {
        // Never block in drop; the worker exits on its own once the flag is seen
        self.handle.stopped.store(true, Ordering::SeqCst);
        let _ = self.handle.tx.try_send(Envelope::Stop);
    }
}

/// Signals completion when the worker thread exits, even by panic
struct DoneSignal(Sender<()>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

fn run_worker<W: ActionWorker>(
    capability: Capability,
    mut worker: W,
    rx: Receiver<Envelope<W::Event>>,
    stopped: Arc<AtomicBool>,
    cancelled: Arc<AtomicU64>,
) {
    tracing::info!("{} worker started", capability);

    while let Ok(envelope) = rx.recv() {
        match envelope {
            Envelope::Work(event) if stopped.load(Ordering::SeqCst) => {
                cancel(capability, &mut worker, event, &cancelled);
            }
            Envelope::Work(event) => {
                tracing::debug!("{} worker processing {:?}", capability, event);
                let result = catch_unwind(AssertUnwindSafe(|| worker.process(event)));
                if result.is_err() {
                    tracing::error!("{} worker caught a panic while processing an event", capability);
                }
            }
            Envelope::Stop => break,
        }
    }

    // Drain whatever arrived behind the sentinel
    for envelope in rx.try_iter() {
        if let Envelope::Work(event) = envelope {
            cancel(capability, &mut worker, event, &cancelled);
        }
    }

    tracing::info!("{} worker shut down", capability);
}

fn cancel<W: ActionWorker>(
    capability: Capability,
    worker: &mut W,
    event: W::Event,
    cancelled: &AtomicU64,
) {
    tracing::warn!("{} worker cancelled queued {:?}", capability, event);
    cancelled.fetch_add(1, Ordering::SeqCst);
    let _ = catch_unwind(AssertUnwindSafe(|| worker.cancel(event)));
}
