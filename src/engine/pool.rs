//! Bounded queue feeding a fixed set of engine workers.

use super::DecisionEngine;
use super::query::{ImageQuery, QueryOutcome};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Job {
    query: ImageQuery,
    reply: oneshot::Sender<Result<QueryOutcome>>,
}

/// Runs queries on `workers` tasks pulling from a queue of `capacity` slots.
///
/// A caller that stops waiting does not cancel its query; the worker finishes
/// it and discards the reply.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the workers.
    pub fn start(engine: Arc<DecisionEngine>, workers: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut guard = receiver.lock().await;
                            guard.recv().await
                        };
                        let Some(job) = job else {
                            debug!(worker, "query queue closed, worker exiting");
                            break;
                        };
                        let outcome = engine.process(job.query).await;
                        if job.reply.send(outcome).is_err() {
                            debug!(worker, "caller went away before the reply");
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), capacity, "worker pool started");
        Self {
            sender,
            capacity,
            workers,
        }
    }

    /// Queue a query and wait for its outcome.
    pub async fn submit(&self, query: ImageQuery) -> Result<QueryOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .try_send(Job { query, reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => Error::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => Error::ServiceUnavailable {
                    reason: "worker pool is shut down".to_string(),
                },
            })?;

        outcome.await.map_err(|_| Error::Internal {
            message: "worker dropped the query without replying".to_string(),
        })?
    }

    /// Queue capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free queue slots.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }

    /// Stop accepting queries and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}
