//! Embedding Worker Pool
//!
//! A fixed number of OS threads, each owning one initialized `FaceRecognizer`.
//! Model loading is expensive, so it happens once per worker at startup and
//! never per job.
//!
//! Hand-off is unbuffered in effect: `submit` first waits for an idle-worker
//! permit, so a job only enters the queue once a worker is free to take it.
//! The permit travels with the job and is released when the worker is done.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use super::worker::{panic_message, EmbeddingWorker};
use super::{BoundingBox, EmbeddingVector, FaceRecognizer};
use crate::error::{EmbeddingError, PoolError};

/// One unit of embedding work.
#[derive(Debug, Clone)]
pub struct Job {
    pub identity: String,
    pub image: Vec<u8>,
    pub bounding_box: Option<BoundingBox>,
}

/// What a worker writes to a job's response slot.
pub type JobResult = Result<EmbeddingVector, EmbeddingError>;

/// Single-use receiver for one job's result.
pub type ResponseSlot = oneshot::Receiver<JobResult>;

/// A job on its way to a worker.
pub(crate) struct Dispatch {
    pub job: Job,
    pub slot: oneshot::Sender<JobResult>,
    pub permit: OwnedSemaphorePermit,
}

/// Queue end shared by all workers. Whoever holds the lock is the one idle
/// worker waiting for the next job.
pub(crate) type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Dispatch>>>;

/// Fixed-size pool of embedding workers
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    idle: Arc<Semaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers. `factory` runs once inside each worker thread to
    /// build that worker's recognizer, so recognizers never cross threads.
    ///
    /// Blocks until every worker is initialized; fails if any of them could
    /// not be.
    pub fn start<R, F>(size: usize, factory: F) -> Result<Self, PoolError>
    where
        R: FaceRecognizer + 'static,
        F: Fn(usize) -> Result<R, EmbeddingError> + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(PoolError::Empty);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(Mutex::new(receiver));
        let factory = Arc::new(factory);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let pool = Self {
            sender: Mutex::new(Some(sender)),
            idle: Arc::new(Semaphore::new(size)),
            handles: Mutex::new(Vec::with_capacity(size)),
            size,
        };

        for id in 1..=size {
            let queue = queue.clone();
            let factory = factory.clone();
            let ready_tx = ready_tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("embedding-worker-{}", id))
                .spawn(move || {
                    info!("Worker {}: Init recognizer", id);
                    let init = catch_unwind(AssertUnwindSafe(|| factory(id))).unwrap_or_else(
                        |payload| Err(EmbeddingError::Panicked(panic_message(payload.as_ref()))),
                    );
                    match init {
                        Ok(recognizer) => {
                            let _ = ready_tx.send((id, Ok(())));
                            drop(ready_tx);
                            EmbeddingWorker::new(id, recognizer).run(queue);
                        }
                        Err(e) => {
                            let _ = ready_tx.send((id, Err(e)));
                        }
                    }
                });

            match spawned {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    pool.join();
                    return Err(PoolError::Spawn(e));
                }
            }
        }
        drop(ready_tx);

        for _ in 0..size {
            match ready_rx.recv() {
                Ok((_, Ok(()))) => {}
                Ok((worker, Err(source))) => {
                    pool.shutdown();
                    pool.join();
                    return Err(PoolError::Init { worker, source });
                }
                Err(_) => {
                    pool.shutdown();
                    pool.join();
                    return Err(PoolError::Closed);
                }
            }
        }

        info!("Worker pool ready with {} workers", size);
        Ok(pool)
    }

    /// Hand a job to the next free worker.
    ///
    /// Waits while all workers are busy. Returns as soon as the job is
    /// handed off; the result arrives on the returned slot.
    pub async fn submit(&self, job: Job) -> Result<ResponseSlot, PoolError> {
        let permit = self
            .idle
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let (slot_tx, slot_rx) = oneshot::channel();
        let dispatch = Dispatch {
            job,
            slot: slot_tx,
            permit,
        };

        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(dispatch).map_err(|_| PoolError::Closed)?,
            None => return Err(PoolError::Closed),
        }

        Ok(slot_rx)
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently holding a job
    pub fn available(&self) -> usize {
        self.idle.available_permits()
    }

    /// Whether the pool still accepts jobs
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting jobs. Workers finish what they hold, then exit.
    pub fn shutdown(&self) {
        self.idle.close();
        if self.sender.lock().take().is_some() {
            info!("Worker pool shutting down");
        }
    }

    /// Wait for worker threads to exit. Call after `shutdown`.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("Embedding worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
