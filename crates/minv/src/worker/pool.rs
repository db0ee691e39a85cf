use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::tasks::registry::Registry;
use crate::worker::job::WorkItem;

/// Fixed set of threads running submitted work through the [`Registry`].
///
/// [`close`](Self::close) refuses new work and lets the queue drain;
/// [`terminate`](Self::terminate) also drops whatever is still queued.
pub struct WorkerPool {
    job_sender: Mutex<Option<Sender<WorkItem>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(registry: Arc<Registry>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = bounded::<WorkItem>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_registry = Arc::clone(&registry);

            let handle = thread::Builder::new()
                .name(format!("minv-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_registry))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender: Mutex::new(Some(job_sender)),
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    /// Queues `item` without waiting for its result. Blocks while the
    /// queue is full.
    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        let sender = self
            .job_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WorkerError::ChannelClosed)?;
        sender.send(item).map_err(|_| WorkerError::ChannelClosed)
    }

    /// Refuses further submissions. Queued items are still processed.
    pub fn close(&self) {
        let sender = self
            .job_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            info!("Closing worker pool");
        }
    }

    /// Refuses further submissions and abandons queued items. Items
    /// already running complete.
    pub fn terminate(&self) {
        info!("Terminating worker pool");
        self.shutdown.store(true, Ordering::Relaxed);
        self.close();
    }

    /// Joins all workers. Returns once the pool is closed and drained, or
    /// terminated.
    pub fn wait(&self) {
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<WorkItem>,
    shutdown: Arc<AtomicBool>,
    registry: Arc<Registry>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => {
                let what = item.describe();
                debug!("Worker {} processing {}", worker_id, what);

                let outcome = catch_unwind(AssertUnwindSafe(|| match item {
                    WorkItem::Run { task, arguments } => registry.run(&task, arguments),
                    WorkItem::Rerun { job_id } => registry.run_job(&job_id),
                }));
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Worker {}: {} failed: {}", worker_id, what, e),
                    Err(_) => error!("Worker {}: {} panicked", worker_id, what),
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
