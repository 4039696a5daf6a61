//! Deploy worker.
//!
//! Drains the work queue: blueprint jobs go through the orchestrator,
//! detached command jobs through the executor. Command jobs are
//! at-least-once; a worker that dies mid-command leaves it eligible for
//! re-submission by the producer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::CommandExecutor;
use crate::deploy::Orchestrator;
use crate::queue::{DeployJob, DeployQueue};

/// Worker task processing jobs from the deploy queue.
pub struct DeployWorker {
    id: usize,
    queue: Arc<DeployQueue>,
    orchestrator: Arc<Orchestrator>,
    executor: CommandExecutor,
}

impl DeployWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        id: usize,
        queue: Arc<DeployQueue>,
        orchestrator: Arc<Orchestrator>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            id,
            queue,
            orchestrator,
            executor,
        }
    }

    /// Run the worker loop until the cancellation token fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = self.id, "deploy worker started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(worker_id = self.id, "deploy worker shutting down");
                    break;
                }

                job = self.queue.next() => {
                    self.process(job).await;
                }
            }
        }

        info!(worker_id = self.id, "deploy worker stopped");
    }

    async fn process(&self, job: DeployJob) {
        match job {
            DeployJob::Blueprint(id) => {
                info!(worker_id = self.id, blueprint_id = %id, "processing blueprint");

                if let Err(e) = self.orchestrator.run(&id).await {
                    // The orchestrator already settled the blueprint's
                    // terminal status; this is operator-facing visibility.
                    error!(worker_id = self.id, blueprint_id = %id, error = %e, "blueprint run failed");
                }

                self.queue.complete(&id);
            }
            DeployJob::Command { command, mut options } => {
                // Strip the detach flag so the job runs inline here instead
                // of re-queueing itself forever.
                options.detach = false;

                match self.executor.execute(&command, options).await {
                    Ok(result) if !result.successful => {
                        warn!(
                            worker_id = self.id,
                            command = %result.command,
                            exit_code = result.exit_code,
                            "queued command failed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(worker_id = self.id, error = %e, "queued command could not run");
                    }
                }
            }
        }
    }
}
