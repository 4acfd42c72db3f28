//! Bounded batch queue: jobs flow through an `mpsc` channel and run under a semaphore.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cancellation::CancellationToken;
use super::controller::PostGenerationController;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::{GenerationRequest, Post};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is shut down")]
    ShutDown,
}

impl From<JobQueueError> for PipelineError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::QueueFull => PipelineError::RateLimit {
                source_name: "job_queue".to_string(),
                time_to_wait_ms: 1_000,
            },
            JobQueueError::ShutDown => PipelineError::Unexpected(err.to_string()),
        }
    }
}

struct Job {
    id: Uuid,
    request: GenerationRequest,
    cancel: CancellationToken,
    reply: oneshot::Sender<PipelineResult<Post>>,
}

/// Completion signal of one submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    cancel: CancellationToken,
    receiver: oneshot::Receiver<PipelineResult<Post>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's result
    pub async fn wait(self) -> PipelineResult<Post> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(PipelineError::Unexpected(format!("job {} was dropped", self.id))))
    }
}

pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl JobQueue {
    /// Spawn the dispatcher; at most `concurrency` jobs run at once and at most
    /// `capacity` wait in the channel
    pub fn start(controller: Arc<PostGenerationController>, concurrency: usize, capacity: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let permits = Arc::new(Semaphore::new(concurrency));

        let dispatcher = tokio::spawn(dispatch(controller, receiver, Arc::clone(&permits)));
        tracing::info!("✅ Job queue started ({} workers, capacity {})", concurrency, capacity.max(1));

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            permits,
            concurrency,
        }
    }

    /// Queue a request, waiting for channel space
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobHandle, JobQueueError> {
        let sender = self.sender.lock().clone().ok_or(JobQueueError::ShutDown)?;
        let (job, handle) = Self::job(request);
        sender.send(job).await.map_err(|_| JobQueueError::ShutDown)?;
        Ok(handle)
    }

    /// Queue a request without waiting; fails when the channel is full
    pub fn try_submit(&self, request: GenerationRequest) -> Result<JobHandle, JobQueueError> {
        let sender = self.sender.lock().clone().ok_or(JobQueueError::ShutDown)?;
        let (job, handle) = Self::job(request);
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => JobQueueError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => JobQueueError::ShutDown,
        })?;
        Ok(handle)
    }

    /// Jobs currently holding a worker permit
    pub fn running(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Stop accepting jobs, let queued and running jobs finish, then return
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                tracing::error!("❌ Job dispatcher failed: {}", e);
            }
        }

        // Every permit back means every job has finished
        if self.permits.acquire_many(self.concurrency as u32).await.is_err() {
            tracing::debug!("Job queue permits already closed");
        }
        tracing::info!("🧹 Job queue shut down");
    }

    fn job(request: GenerationRequest) -> (Job, JobHandle) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (reply, receiver) = oneshot::channel();
        (
            Job {
                id,
                request,
                cancel: cancel.clone(),
                reply,
            },
            JobHandle { id, cancel, receiver },
        )
    }
}

async fn dispatch(
    controller: Arc<PostGenerationController>,
    mut receiver: mpsc::Receiver<Job>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            let _ = job.reply.send(Err(PipelineError::Unexpected("job queue closed".to_string())));
            break;
        };
        let controller = Arc::clone(&controller);

        tokio::spawn(async move {
            let _permit = permit;
            tracing::debug!("📥 Job {} started: '{}'", job.id, job.request.topic);

            let result = if job.cancel.is_cancelled() {
                Err(PipelineError::Cancelled)
            } else {
                AssertUnwindSafe(controller.generate_post(&job.request, &job.cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(PipelineError::Unexpected(format!("job {} panicked", job.id))))
            };

            match &result {
                Ok(_) => tracing::debug!("✅ Job {} finished", job.id),
                Err(e) => tracing::warn!("⚠️  Job {} failed: {}", job.id, e),
            }
            let _ = job.reply.send(result);
        });
    }
}
