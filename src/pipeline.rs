//! Plumbing for the one-step-ahead pipeline: a blocking, shareable handle to a
//! result still being computed ([`Pending`]), the one-shot completer that
//! fills it ([`Promise`]), and a dedicated FIFO worker thread
//! ([`SerialExecutor`]).

use crossbeam_channel::{bounded, Sender};
use log::error;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// The background computation ran and reported a failure.
    #[error("background step failed: {0}")]
    StepFailed(String),
    /// The worker went away (panicked or was shut down) before completing the result.
    #[error("worker dropped the result before completing it")]
    WorkerLost,
    #[error("failed to start worker thread: {0}")]
    Spawn(String),
}

enum SlotState<T> {
    Waiting,
    Done(Arc<T>),
    Failed(PipelineError),
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn resolve(&self, outcome: SlotState<T>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, SlotState::Waiting) {
            *state = outcome;
            self.ready.notify_all();
        }
    }
}

/// Read-only handle to a value that a background task is producing.
///
/// Cloning is cheap; every clone observes the same result. The value is
/// handed out as an `Arc` and is never mutated after completion.
pub struct Pending<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Pending { slot: Arc::clone(&self.slot) }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("ready", &self.is_ready()).finish()
    }
}

/// Write side of a [`Pending`]. Dropping it without completing resolves the
/// handle to [`PipelineError::WorkerLost`], so waiters never hang on a dead worker.
pub struct Promise<T> {
    slot: Option<Arc<Slot<T>>>,
}

/// Creates a connected promise/handle pair.
pub fn pending<T>() -> (Promise<T>, Pending<T>) {
    let slot = Arc::new(Slot { state: Mutex::new(SlotState::Waiting), ready: Condvar::new() });
    (Promise { slot: Some(Arc::clone(&slot)) }, Pending { slot })
}

impl<T> Pending<T> {
    /// Blocks until the value is available.
    pub fn wait(&self) -> Result<Arc<T>, PipelineError> {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                SlotState::Done(value) => return Ok(Arc::clone(value)),
                SlotState::Failed(err) => return Err(err.clone()),
                // Spurious wakeups land back here.
                SlotState::Waiting => {}
            }
            state = self.slot.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_ready(&self) -> bool {
        let state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(*state, SlotState::Waiting)
    }
}

impl<T> Promise<T> {
    /// Publishes the value and returns a shared reference to it.
    pub fn fulfil(mut self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        if let Some(slot) = self.slot.take() {
            slot.resolve(SlotState::Done(Arc::clone(&value)));
        }
        value
    }

    pub fn fail(mut self, err: PipelineError) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(SlotState::Failed(err));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(SlotState::Failed(PipelineError::WorkerLost));
        }
    }
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// A single worker thread that runs submitted jobs one at a time, in order,
/// with exclusive access to a piece of state it owns.
pub struct SerialExecutor<S> {
    tx: Option<Sender<Job<S>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<S: Send + 'static> SerialExecutor<S> {
    pub fn spawn(name: &str, mut state: S) -> Result<Self, PipelineError> {
        // Capacity one: at most a single job waits behind the running one.
        let (tx, rx) = bounded::<Job<S>>(1);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job(&mut state);
                }
            })
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;
        Ok(SerialExecutor { tx: Some(tx), handle: Some(handle) })
    }

    /// Queues a job. Fails only if the worker thread has died.
    pub fn submit<F>(&self, job: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).map_err(|_| PipelineError::WorkerLost),
            None => Err(PipelineError::WorkerLost),
        }
    }
}

impl<S> Drop for SerialExecutor<S> {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("pipeline worker panicked");
            }
        }
    }
}

/// Terminates the process after a background failure. A half-computed
/// physical state cannot be continued, so there is no recovery path.
pub fn fatal(context: &str, err: &PipelineError) -> ! {
    error!("{}: {}. Terminating.", context, err);
    std::process::exit(1)
}
