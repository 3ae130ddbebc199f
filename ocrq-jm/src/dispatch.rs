//! Task dispatch
//!
//! One task per uploaded file, enqueued only after the file's
//! authoritative row and the job's incremented counters have committed.
//! Delivery is at-least-once: a task that fails transiently is
//! re-enqueued (with its attempt counter bumped) until the configured
//! attempt limit is reached, so a file may be observed by a worker more
//! than once. Identifiers travel as strings — the queue is a wire
//! boundary and workers re-validate on receipt.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One unit of asynchronous work: "process this file".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrTask {
    pub job_id: String,
    pub file_id: String,
    pub object_key: String,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
}

impl OcrTask {
    pub fn new(job_id: String, file_id: String, object_key: String) -> Self {
        Self {
            job_id,
            file_id,
            object_key,
            attempt: 1,
        }
    }

    /// The same task, redelivered.
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Fire-and-forget task queue producer interface.
pub trait TaskDispatcher: Send + Sync {
    fn enqueue(&self, task: OcrTask);
}

/// In-process queue backed by an unbounded channel; workers share the
/// receiving end.
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<OcrTask>,
}

impl QueueDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OcrTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskDispatcher for QueueDispatcher {
    fn enqueue(&self, task: OcrTask) {
        tracing::debug!(
            job_id = %task.job_id,
            file_id = %task.file_id,
            attempt = task.attempt,
            "Enqueueing task"
        );
        if self.tx.send(task).is_err() {
            // Receiver side shut down; the task will be redelivered on
            // the next service start from the file's QUEUED state
            tracing::error!("Task queue closed, dropping enqueue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_delivers() {
        let (dispatcher, mut rx) = QueueDispatcher::new();
        dispatcher.enqueue(OcrTask::new("j".into(), "f".into(), "j/f/a.png".into()));

        let task = rx.recv().await.unwrap();
        assert_eq!(task.file_id, "f");
        assert_eq!(task.attempt, 1);
    }

    #[test]
    fn test_redelivery_bumps_attempt() {
        let task = OcrTask::new("j".into(), "f".into(), "k".into());
        let again = task.redelivery();
        assert_eq!(again.attempt, 2);
        assert_eq!(again.object_key, task.object_key);
    }
}
