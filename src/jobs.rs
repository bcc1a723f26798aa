//! Supervised background job pool.
//!
//! Long-running work (transcode fan-out, merges) is submitted here instead of
//! being spawned fire-and-forget, so shutdown can wait for in-flight jobs.
//! Concurrency is bounded by a semaphore; jobs queue up behind it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job queue is shut down")]
    QueueClosed,
}

/// Handle for submitting background jobs. Cheap to clone; dropping every
/// clone closes the queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Queue a job for execution. Backpressures when the queue is full and
    /// fails only after shutdown has begun.
    pub async fn submit<F>(&self, job: F) -> Result<(), JobError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| JobError::QueueClosed)
    }
}

/// Owns the dispatcher task. `join` resolves once the queue is closed and
/// every in-flight job has finished.
pub struct JobSupervisor {
    handle: JoinHandle<()>,
}

impl JobSupervisor {
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Start the pool. At most `max_concurrency` jobs run at once.
pub fn start(max_concurrency: usize) -> (JobQueue, JobSupervisor) {
    let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let handle = tokio::spawn(async move {
        let mut running = JoinSet::new();
        while let Some(job) = rx.recv().await {
            // The semaphore is never closed, so acquisition only fails if the
            // runtime is tearing down.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            running.spawn(async move {
                job.await;
                drop(permit);
            });
            // Reap whatever already finished to keep the set small.
            while running.try_join_next().is_some() {}
        }
        debug!("job queue closed, draining {} in-flight job(s)", running.len());
        while running.join_next().await.is_some() {}
        info!("job supervisor stopped");
    });

    (JobQueue { tx }, JobSupervisor { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let (queue, supervisor) = start(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            queue
                .submit(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        drop(queue);
        supervisor.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_work() {
        let (queue, supervisor) = start(1);
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let done = Arc::new(AtomicUsize::new(0));

        let done_clone = done.clone();
        queue
            .submit(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                done_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        started_rx.await.unwrap();
        drop(queue);

        let join = tokio::spawn(supervisor.join());
        assert_eq!(done.load(Ordering::SeqCst), 0);
        release_tx.send(()).unwrap();
        join.await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let (queue, supervisor) = start(1);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let peak = peak.clone();
            let current = current.clone();
            queue
                .submit(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        drop(queue);
        supervisor.join().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
