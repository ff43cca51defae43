//! Retrieval Orchestrator: fans jobs out to a dispatcher, one task per job.
//!
//! Jobs never wait on each other and each reports its terminal outcome on
//! its own oneshot channel. The returned [`JobSet`] can be awaited or simply
//! dropped; dropping it does not cancel anything.

use crate::delivery::DeliveryRouter;
use crate::metrics_defs::{JOBS_DISPATCHED, JOBS_FAILED, NOTICES_FAILED};
use crate::types::{JobKind, JobOutcome, RetrievalJob};
use crate::worker::Worker;
use async_trait::async_trait;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid retrieval service url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("retrieval service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("retrieval service answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Hands a job to whatever runs it.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, job: RetrievalJob) -> Result<JobOutcome, DispatchError>;
}

/// Runs jobs on the local worker.
pub struct InProcessDispatcher {
    worker: Arc<Worker>,
}

impl InProcessDispatcher {
    pub fn new(worker: Arc<Worker>) -> Self {
        InProcessDispatcher { worker }
    }
}

#[async_trait]
impl Dispatcher for InProcessDispatcher {
    async fn dispatch(&self, job: RetrievalJob) -> Result<JobOutcome, DispatchError> {
        Ok(self.worker.run(&job).await)
    }
}

/// Posts jobs to the worker endpoints of a remote retrieval service.
pub struct HttpDispatcher {
    client: reqwest::Client,
    file_url: Url,
    record_url: Url,
}

impl HttpDispatcher {
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(HttpDispatcher {
            client,
            file_url: base.join("/jobs/file")?,
            record_url: base.join("/jobs/record")?,
        })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, job: RetrievalJob) -> Result<JobOutcome, DispatchError> {
        let url = match job.kind {
            JobKind::File => &self.file_url,
            JobKind::Record { .. } => &self.record_url,
        };

        let response = self.client.post(url.clone()).json(&job).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

struct PendingJob {
    key: String,
    outcome: oneshot::Receiver<JobOutcome>,
}

/// Completion handles for the jobs of one request.
#[derive(Default)]
pub struct JobSet {
    pending: Vec<PendingJob>,
}

impl JobSet {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Waits for every job, returning outcomes in dispatch order.
    pub async fn join_all(self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::with_capacity(self.pending.len());
        for job in self.pending {
            let outcome = job.outcome.await.unwrap_or_else(|_| JobOutcome::Failed {
                key: job.key,
                reason: "job task ended without an outcome".to_string(),
            });
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    dispatcher: Arc<dyn Dispatcher>,
    delivery: Arc<DeliveryRouter>,
}

impl Orchestrator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, delivery: Arc<DeliveryRouter>) -> Self {
        Orchestrator {
            dispatcher,
            delivery,
        }
    }

    pub fn dispatch_all(&self, jobs: Vec<RetrievalJob>) -> JobSet {
        let mut set = JobSet::default();

        for job in jobs {
            let (tx, rx) = oneshot::channel();
            set.pending.push(PendingJob {
                key: job.key.clone(),
                outcome: rx,
            });

            let dispatcher = self.dispatcher.clone();
            let delivery = self.delivery.clone();
            counter!(JOBS_DISPATCHED, "kind" => job.kind_name()).increment(1);

            tokio::spawn(async move {
                let outcome = match dispatcher.dispatch(job.clone()).await {
                    Ok(outcome) => outcome,
                    Err(err) => dispatch_failed(&delivery, &job, err).await,
                };
                // Nobody may be waiting
                let _ = tx.send(outcome);
            });
        }

        set
    }
}

async fn dispatch_failed(
    delivery: &DeliveryRouter,
    job: &RetrievalJob,
    err: DispatchError,
) -> JobOutcome {
    counter!(JOBS_FAILED, "kind" => job.kind_name()).increment(1);
    tracing::error!(key = %job.key, error = %err, "could not dispatch retrieval job");

    let reason = "the retrieval service could not be reached".to_string();
    if let Err(notify_err) = delivery.send_failure(job, &reason).await {
        counter!(NOTICES_FAILED, "notice" => "failure").increment(1);
        tracing::error!(key = %job.key, error = %notify_err, "could not send failure notice");
    }

    JobOutcome::Failed {
        key: job.key.clone(),
        reason,
    }
}
