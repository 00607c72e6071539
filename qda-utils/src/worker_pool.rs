// std
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
// crates
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
// internal

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("Worker pool is shut down")]
    Closed,
    #[error("Task was cancelled before completion")]
    Cancelled,
    #[error("Blocking task panicked: {0}")]
    Panicked(String),
}

/// Fixed size set of tasks pulling jobs from a bounded queue.
///
/// Submitting waits while the queue is full, so at most `num_workers` jobs run and at most
/// `queue_size` wait at any time. Shutting down cancels queued and running jobs and waits for
/// every worker to exit.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Result of a submitted job.
pub struct TaskHandle<T>(oneshot::Receiver<T>);

impl<T> TaskHandle<T> {
    pub async fn join(self) -> Result<T, WorkerPoolError> {
        self.0.await.map_err(|_| WorkerPoolError::Cancelled)
    }
}

impl WorkerPool {
    /// Spawn the workers on the current tokio runtime.
    pub fn new(num_workers: usize, queue_size: usize) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();
        let workers = (0..num_workers)
            .map(|id| tokio::spawn(Self::worker(id, receiver.clone(), cancel.clone())))
            .collect();
        Self {
            sender,
            workers: Mutex::new(workers),
            cancel,
        }
    }

    async fn worker(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = async { receiver.lock().await.recv().await } => job,
            };
            let Some(job) = job else {
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(worker = id, "Dropping in flight job on shutdown");
                    break;
                }
                result = AssertUnwindSafe(job).catch_unwind() => {
                    if result.is_err() {
                        warn!(worker = id, "Job panicked");
                    }
                }
            }
        }
        debug!(worker = id, "Worker stopped");
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue `task`, waiting for room in the queue.
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, WorkerPoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(WorkerPoolError::Closed);
        }
        let (reply, handle) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = reply.send(task.await);
        });
        self.sender
            .send(job)
            .await
            .map_err(|_| WorkerPoolError::Closed)?;
        Ok(TaskHandle(handle))
    }

    /// Queue a CPU bound closure. It runs on the blocking thread pool while holding one worker
    /// slot, so the pool size also bounds cryptographic work.
    pub async fn submit_blocking<F, T>(
        &self,
        task: F,
    ) -> Result<TaskHandle<Result<T, WorkerPoolError>>, WorkerPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(async move {
            tokio::task::spawn_blocking(task)
                .await
                .map_err(|e| WorkerPoolError::Panicked(e.to_string()))
        })
        .await
    }

    /// Cancel queued and running jobs and wait for all workers to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                debug!("Worker task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod test {
    use super::{WorkerPool, WorkerPoolError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let pool = WorkerPool::new(4, 16);
        let mut handles = Vec::new();
        for i in 0..32u64 {
            handles.push(pool.submit(async move { i * 2 }).await.unwrap());
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().await.unwrap());
        }
        assert_eq!(results, (0..32u64).map(|i| i * 2).collect::<Vec<_>>());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2, 8);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn blocking_jobs_return_values() {
        let pool = WorkerPool::new(2, 2);
        let handle = pool.submit_blocking(|| (1..=10u64).product::<u64>()).await.unwrap();
        assert_eq!(handle.join().await.unwrap().unwrap(), 3_628_800);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_jobs() {
        let pool = WorkerPool::new(1, 4);
        let handle = pool
            .submit(futures::future::pending::<()>())
            .await
            .unwrap();
        pool.shutdown().await;
        assert_eq!(handle.join().await, Err(WorkerPoolError::Cancelled));
        assert_eq!(
            pool.submit(async {}).await.err(),
            Some(WorkerPoolError::Closed)
        );
    }
}
