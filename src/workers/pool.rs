//! Bounded worker pool shared by all five pipeline stages.
//!
//! Each pool owns a bounded job channel drained by N long-lived workers.
//! Submission is always non-blocking: a full queue is reported to the caller
//! instead of applying back-pressure, and the caller leaves the record in
//! `processing` for the recovery sweep to pick up on the next boot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Errors from [`WorkerPool::submit`] and [`WorkerPool::start`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("{pool} queue is full")]
    QueueFull { pool: &'static str },

    #[error("{pool} worker pool is not running")]
    NotRunning { pool: &'static str },

    #[error("{pool} worker pool is shutting down")]
    ShuttingDown { pool: &'static str },

    #[error("{pool} worker pool is already running")]
    AlreadyRunning { pool: &'static str },
}

/// Stage-specific job processing plugged into a [`WorkerPool`].
///
/// A handler must never let a job failure escape: failures are recorded as a
/// `failed` status on the owning record (or logged, for records it cannot
/// reach) so one bad job cannot poison the pool.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: Send + 'static;

    /// Pool name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Upper bound on a single job. Jobs exceeding it are abandoned; their
    /// records stay `processing` and are re-queued by recovery.
    fn job_timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn process(&self, worker_id: usize, job: Self::Job);
}

/// Fixed-size team of workers draining a bounded queue.
pub struct WorkerPool<H: JobHandler> {
    handler: Arc<H>,
    workers: usize,
    capacity: usize,
    job_tx: mpsc::Sender<H::Job>,
    job_rx: Arc<Mutex<mpsc::Receiver<H::Job>>>,
    shutdown_tx: watch::Sender<bool>,
    running: RwLock<bool>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: JobHandler> WorkerPool<H> {
    pub fn new(handler: Arc<H>, workers: usize, queue_size: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel(queue_size);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            handler,
            workers,
            capacity: queue_size,
            job_tx,
            job_rx: Arc::new(Mutex::new(job_rx)),
            shutdown_tx,
            running: RwLock::new(false),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks. Fails if the pool is already running.
    pub async fn start(&self) -> Result<(), SubmitError> {
        let mut running = self.running.write().await;
        if *running {
            return Err(SubmitError::AlreadyRunning {
                pool: self.handler.name(),
            });
        }

        let mut handles = self.worker_handles.lock().await;
        for worker_id in 0..self.workers {
            let handler = self.handler.clone();
            let job_rx = self.job_rx.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => match job {
                                Some(job) => job,
                                None => return,
                            },
                            _ = shutdown_rx.changed() => return,
                        }
                    };

                    let timeout = handler.job_timeout();
                    if tokio::time::timeout(timeout, handler.process(worker_id, job))
                        .await
                        .is_err()
                    {
                        error!(
                            "{} worker {} abandoned a job after {:?}",
                            handler.name(),
                            worker_id,
                            timeout
                        );
                    }
                }
            }));
        }

        *running = true;
        Ok(())
    }

    /// Enqueue a job without blocking.
    pub async fn submit(&self, job: H::Job) -> Result<(), SubmitError> {
        let running = self.running.read().await;
        if !*running {
            return Err(SubmitError::NotRunning {
                pool: self.handler.name(),
            });
        }
        if *self.shutdown_tx.borrow() {
            return Err(SubmitError::ShuttingDown {
                pool: self.handler.name(),
            });
        }

        self.job_tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull {
                pool: self.handler.name(),
            },
            mpsc::error::TrySendError::Closed(_) => SubmitError::NotRunning {
                pool: self.handler.name(),
            },
        })
    }

    /// Signal shutdown, refuse further submissions, and wait for workers to
    /// finish their in-flight jobs. Idempotent.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }

        if self.shutdown_tx.send(true).is_err() {
            warn!("{} pool had no live workers at shutdown", self.handler.name());
        }

        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Number of jobs currently queued.
    pub fn queue_size(&self) -> usize {
        self.capacity - self.job_tx.capacity()
    }

    /// Remaining queue slots.
    pub fn available_space(&self) -> usize {
        self.job_tx.capacity()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
