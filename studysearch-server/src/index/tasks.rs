//! The bounded indexing work-queue. Requests are accepted with a task id and
//! queue position, processed by a small worker pool, and their lifecycle is
//! observable through the status endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{error, info};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use studysearch_types::{
    Error, IndexAccepted, IndexSubmissionRequest, Result, TaskState, TaskStatus,
};

use crate::index::txn::IndexTransactionManager;

struct IndexingTask {
    accession: String,
    task_id: String,
    request: IndexSubmissionRequest,
}

pub struct IndexingQueue {
    tx: mpsc::Sender<IndexingTask>,
    statuses: Arc<DashMap<String, TaskStatus>>,
    depth: Arc<AtomicUsize>,
}

impl IndexingQueue {
    /// Spawn `workers` consumers over a bounded channel of `capacity`.
    pub fn start(txn: Arc<IndexTransactionManager>, capacity: usize, workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<IndexingTask>(capacity.max(1));
        let statuses: Arc<DashMap<String, TaskStatus>> = Arc::new(DashMap::new());
        let depth = Arc::new(AtomicUsize::new(0));
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let txn = Arc::clone(&txn);
            let statuses = Arc::clone(&statuses);
            let depth = Arc::clone(&depth);
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let task = match task {
                        Some(t) => t,
                        None => break,
                    };
                    depth.fetch_sub(1, Ordering::SeqCst);
                    statuses.insert(
                        task.accession.clone(),
                        TaskStatus {
                            state: TaskState::InProgress,
                            message: "indexing".into(),
                            task_id: Some(task.task_id.clone()),
                        },
                    );
                    let outcome = async {
                        txn.update_submission(&task.accession, &task.request).await?;
                        txn.commit().await
                    }
                    .await;
                    let status = match outcome {
                        Ok(()) => {
                            info!("indexed submission '{}' (worker {})", task.accession, worker);
                            TaskStatus {
                                state: TaskState::Done,
                                message: "indexed".into(),
                                task_id: Some(task.task_id.clone()),
                            }
                        }
                        Err(e) => {
                            error!("indexing of '{}' failed: {}", task.accession, e);
                            TaskStatus {
                                state: TaskState::Error,
                                message: e.to_string(),
                                task_id: Some(task.task_id.clone()),
                            }
                        }
                    };
                    statuses.insert(task.accession.clone(), status);
                }
            });
        }

        Arc::new(Self {
            tx,
            statuses,
            depth,
        })
    }

    /// Enqueue an indexing request. A full queue surfaces as 503.
    pub fn enqueue(
        &self,
        accession: &str,
        request: IndexSubmissionRequest,
    ) -> Result<IndexAccepted> {
        let task_id = Uuid::new_v4().to_string();
        let task = IndexingTask {
            accession: accession.to_string(),
            task_id: task_id.clone(),
            request,
        };
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::ServiceUnavailable("indexing queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::ServiceUnavailable("indexing queue is closed".into())
            }
        })?;
        let queue_position = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.statuses.insert(
            accession.to_string(),
            TaskStatus {
                state: TaskState::Queued,
                message: format!("queued at position {}", queue_position),
                task_id: Some(task_id.clone()),
            },
        );
        Ok(IndexAccepted {
            acc_no: accession.to_string(),
            queue_position,
            task_id,
            status_url: format!("/submissions/{}/status", accession),
        })
    }

    pub fn status(&self, accession: &str) -> TaskStatus {
        self.statuses
            .get(accession)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| TaskStatus::not_found(accession))
    }
}
