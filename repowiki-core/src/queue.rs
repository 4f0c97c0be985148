//! Bounded FIFO hand-off between submitters and the single pipeline worker.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::RepositoryJob;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Multi-producer, single-consumer job queue. `submit` waits while the queue is
/// full; both ends give up when the queue's cancellation token fires.
pub struct JobQueue {
    tx: mpsc::Sender<RepositoryJob>,
    rx: Mutex<mpsc::Receiver<RepositoryJob>>,
    cancel: CancellationToken,
}

impl JobQueue {
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            cancel,
        }
    }

    /// Enqueue a job, waiting for room. Returns `false` if the queue was
    /// cancelled or closed before the job got in.
    pub async fn submit(&self, job: RepositoryJob) -> bool {
        let id = job.id.clone();
        let accepted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(job) => sent.is_ok(),
        };
        debug!(job_id = %id, accepted, "[QUEUE] Submit");
        accepted
    }

    /// Wait for the next job. `None` once cancelled or closed.
    pub async fn take(&self) -> Option<RepositoryJob> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            job = rx.recv() => job,
        }
    }

    /// The next job if one is waiting right now.
    pub async fn try_take(&self) -> Option<RepositoryJob> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.lock().await.try_recv().ok()
    }

    /// Stop accepting jobs. Jobs already queued can still be taken.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(address: &str) -> RepositoryJob {
        RepositoryJob::new(address, None)
    }

    #[tokio::test]
    async fn delivers_in_submission_order() {
        let queue = JobQueue::new(8, CancellationToken::new());
        for n in 0..3 {
            assert!(queue.submit(job(&format!("https://h/o/r{n}.git"))).await);
        }
        assert_eq!(queue.len(), 3);
        for n in 0..3 {
            assert_eq!(queue.take().await.unwrap().address, format!("https://h/o/r{n}.git"));
        }
        assert!(queue.try_take().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let queue = Arc::new(JobQueue::new(1, CancellationToken::new()));
        assert!(queue.submit(job("https://h/o/a.git")).await);

        let q = queue.clone();
        let blocked = tokio::spawn(async move { q.submit(job("https://h/o/b.git")).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!blocked.is_finished());

        assert_eq!(queue.take().await.unwrap().address, "https://h/o/a.git");
        assert!(blocked.await.unwrap());
        assert_eq!(queue.take().await.unwrap().address, "https://h/o/b.git");
    }

    #[tokio::test]
    async fn cancellation_releases_both_ends() {
        let cancel = CancellationToken::new();
        let queue = Arc::new(JobQueue::new(1, cancel.clone()));
        assert!(queue.submit(job("https://h/o/a.git")).await);

        let q = queue.clone();
        let waiting_submit = tokio::spawn(async move { q.submit(job("https://h/o/b.git")).await });
        cancel.cancel();
        assert!(!waiting_submit.await.unwrap());
        assert!(queue.take().await.is_none());
    }

    #[tokio::test]
    async fn closed_queue_refuses_new_jobs() {
        let queue = JobQueue::new(4, CancellationToken::new());
        assert!(queue.submit(job("https://h/o/a.git")).await);
        queue.close().await;
        assert!(!queue.submit(job("https://h/o/b.git")).await);
        assert!(queue.take().await.is_some());
        assert!(queue.take().await.is_none());
    }
}
