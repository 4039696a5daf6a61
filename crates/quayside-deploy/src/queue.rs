//! Work queue for blueprint dispatch and fire-and-forget commands.
//!
//! Two kinds of job flow through the queue: deferred blueprint pipeline
//! runs, and detached commands from the executor. Blueprint dispatch is
//! deduplicated by id for a bounded exclusivity window so that one
//! blueprint is never processed by two workers at once. Commands carry
//! at-least-once semantics: a worker that dies mid-command may leave it
//! re-runnable.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::command::CommandOptions;
use crate::error::{DeployError, DeployResult};
use crate::types::BlueprintId;

/// A unit of work pulled off the queue by a worker.
#[derive(Debug, Clone)]
pub enum DeployJob {
    /// Run the deployment pipeline for a blueprint.
    Blueprint(BlueprintId),
    /// Execute a detached command.
    Command {
        /// The raw command line.
        command: String,
        /// Options captured at submission time.
        options: CommandOptions,
    },
}

/// Work queue with per-blueprint exclusivity.
pub struct DeployQueue {
    pending: RwLock<VecDeque<DeployJob>>,
    in_flight: DashMap<String, Instant>,
    exclusivity: Duration,
    max_size: usize,
    notify: Notify,
}

impl DeployQueue {
    /// Create a new queue.
    ///
    /// `exclusivity` bounds how long a dispatched blueprint id suppresses
    /// further dispatches for the same id.
    #[must_use]
    pub fn new(max_size: usize, exclusivity: Duration) -> Self {
        Self {
            pending: RwLock::new(VecDeque::new()),
            in_flight: DashMap::new(),
            exclusivity,
            max_size,
            notify: Notify::new(),
        }
    }

    /// Submit a detached command for eventual execution.
    pub async fn submit_command(&self, command: &str, options: CommandOptions) -> DeployResult<()> {
        let job = DeployJob::Command {
            command: command.to_owned(),
            options,
        };
        self.push(job).await
    }

    /// Dispatch a blueprint for pipeline processing.
    ///
    /// Returns `Ok(true)` if the blueprint was enqueued, `Ok(false)` if a
    /// dispatch for the same id is already in flight inside the
    /// exclusivity window.
    pub async fn dispatch(&self, id: &BlueprintId) -> DeployResult<bool> {
        let key = id.as_str().to_owned();
        let now = Instant::now();

        if let Some(entry) = self.in_flight.get(&key) {
            if now.duration_since(*entry.value()) < self.exclusivity {
                info!(blueprint_id = %id, "dispatch suppressed, already in flight");
                return Ok(false);
            }
            warn!(
                blueprint_id = %id,
                "exclusivity window expired for in-flight blueprint, re-dispatching"
            );
        }

        self.in_flight.insert(key, now);
        match self.push(DeployJob::Blueprint(id.clone())).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // Keep the invariant that only queued or running blueprints
                // hold an exclusivity slot.
                self.in_flight.remove(id.as_str());
                Err(e)
            }
        }
    }

    async fn push(&self, job: DeployJob) -> DeployResult<()> {
        let mut pending = self.pending.write().await;

        if pending.len() >= self.max_size {
            return Err(DeployError::QueueFull);
        }

        pending.push_back(job);
        drop(pending);

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for and return the next job.
    pub async fn next(&self) -> DeployJob {
        loop {
            {
                let mut pending = self.pending.write().await;
                if let Some(job) = pending.pop_front() {
                    debug!("job dequeued");
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Try to get the next job without blocking.
    pub async fn try_next(&self) -> Option<DeployJob> {
        self.pending.write().await.pop_front()
    }

    /// Release a blueprint's exclusivity slot after its run finishes.
    pub fn complete(&self, id: &BlueprintId) {
        self.in_flight.remove(id.as_str());
    }

    /// Number of jobs waiting in the queue.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Whether a blueprint currently holds an exclusivity slot.
    #[must_use]
    pub fn is_in_flight(&self, id: &BlueprintId) -> bool {
        self.in_flight.contains_key(id.as_str())
    }
}

impl std::fmt::Debug for DeployQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployQueue")
            .field("max_size", &self.max_size)
            .field("exclusivity", &self.exclusivity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(exclusivity: Duration) -> DeployQueue {
        DeployQueue::new(8, exclusivity)
    }

    #[tokio::test]
    async fn dispatch_and_retrieve() {
        let queue = queue(Duration::from_secs(60));
        let id = BlueprintId::generate();

        assert!(queue.dispatch(&id).await.unwrap());
        assert_eq!(queue.pending_count().await, 1);
        assert!(queue.is_in_flight(&id));

        let job = queue.try_next().await.expect("job available");
        assert!(matches!(job, DeployJob::Blueprint(got) if got == id));
    }

    #[tokio::test]
    async fn duplicate_dispatch_is_suppressed() {
        let queue = queue(Duration::from_secs(60));
        let id = BlueprintId::generate();

        assert!(queue.dispatch(&id).await.unwrap());
        assert!(!queue.dispatch(&id).await.unwrap());
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn dispatch_allowed_after_completion() {
        let queue = queue(Duration::from_secs(60));
        let id = BlueprintId::generate();

        assert!(queue.dispatch(&id).await.unwrap());
        queue.try_next().await.expect("job");
        queue.complete(&id);

        assert!(!queue.is_in_flight(&id));
        assert!(queue.dispatch(&id).await.unwrap());
    }

    #[tokio::test]
    async fn dispatch_allowed_after_window_expiry() {
        let queue = queue(Duration::from_millis(10));
        let id = BlueprintId::generate();

        assert!(queue.dispatch(&id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Window expired; the stuck run no longer blocks a new dispatch.
        assert!(queue.dispatch(&id).await.unwrap());
        assert_eq!(queue.pending_count().await, 2);
    }

    #[tokio::test]
    async fn queue_full_rejects_and_releases_slot() {
        let queue = DeployQueue::new(1, Duration::from_secs(60));
        let a = BlueprintId::generate();
        let b = BlueprintId::generate();

        assert!(queue.dispatch(&a).await.unwrap());
        let err = queue.dispatch(&b).await.unwrap_err();
        assert!(matches!(err, DeployError::QueueFull));
        // The rejected blueprint must not keep its exclusivity slot.
        assert!(!queue.is_in_flight(&b));
    }

    #[tokio::test]
    async fn commands_flow_through_the_queue() {
        let queue = queue(Duration::from_secs(60));
        queue
            .submit_command("echo hi", CommandOptions::default())
            .await
            .unwrap();

        let job = queue.try_next().await.expect("job");
        assert!(matches!(job, DeployJob::Command { command, .. } if command == "echo hi"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_next_receives_notification() {
        let queue = std::sync::Arc::new(queue(Duration::from_secs(60)));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = BlueprintId::generate();
        queue.dispatch(&id).await.unwrap();

        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timeout")
            .expect("task");
        assert!(matches!(job, DeployJob::Blueprint(_)));
    }
}
