use crate::config::ExtractionConfig;
use crate::delivery::DeliveryRouter;
use crate::errors::{Result, RetrievalError};
use crate::extractor::{Extraction, RecordExtractor};
use crate::metrics_defs::{
    COMPRESSED_BYTES, JOB_DURATION, JOBS_FAILED, NO_MATCHING_RECORDS, NOTICES_FAILED,
    SIZE_LIMIT_EXCEEDED,
};
use crate::query::FilterExpression;
use crate::store::RecordQuery;
use crate::types::{JobKind, JobOutcome, RetrievalJob};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

/// Runs one retrieval job to its terminal notification.
pub struct Worker {
    query: Arc<dyn RecordQuery>,
    delivery: Arc<DeliveryRouter>,
    extractor: RecordExtractor,
}

impl Worker {
    pub fn new(
        query: Arc<dyn RecordQuery>,
        delivery: Arc<DeliveryRouter>,
        extraction: &ExtractionConfig,
    ) -> Self {
        Worker {
            query,
            delivery,
            extractor: RecordExtractor::new(extraction),
        }
    }

    /// Never returns an error: failures are reported to the requester and
    /// come back as [`JobOutcome::Failed`].
    pub async fn run(&self, job: &RetrievalJob) -> JobOutcome {
        let started = Instant::now();

        let result = match &job.kind {
            JobKind::File => self.delivery.deliver_file(job).await,
            JobKind::Record { filter } => self.run_record(job, filter).await,
        };

        histogram!(JOB_DURATION).record(started.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => outcome,
            Err(err) => self.fail(job, err).await,
        }
    }

    async fn run_record(
        &self,
        job: &RetrievalJob,
        filter: &FilterExpression,
    ) -> Result<JobOutcome> {
        let events = self.query.select(&job.bucket, &job.key, filter).await?;

        match self.extractor.extract(&job.key, events).await? {
            Extraction::NoMatchingRecords => {
                counter!(NO_MATCHING_RECORDS).increment(1);
                self.delivery.send_no_matching_records(job).await?;
                Ok(JobOutcome::NoMatchingRecords {
                    key: job.key.clone(),
                })
            }
            Extraction::Artifact(artifact) => {
                histogram!(COMPRESSED_BYTES).record(artifact.compressed_size as f64);
                self.delivery.deliver_artifact(job, artifact).await
            }
        }
    }

    async fn fail(&self, job: &RetrievalJob, err: RetrievalError) -> JobOutcome {
        counter!(JOBS_FAILED, "kind" => job.kind_name()).increment(1);
        if matches!(err, RetrievalError::SizeLimitExceeded { .. }) {
            counter!(SIZE_LIMIT_EXCEEDED).increment(1);
        }
        tracing::warn!(bucket = %job.bucket, key = %job.key, error = %err, "retrieval job failed");

        let reason = err.notice_reason();
        if let Err(notify_err) = self.delivery.send_failure(job, &reason).await {
            counter!(NOTICES_FAILED, "notice" => "failure").increment(1);
            tracing::error!(
                key = %job.key,
                error = %notify_err,
                "could not send failure notice"
            );
        }

        JobOutcome::Failed {
            key: job.key.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::delivery::Content;
    use crate::query::QueryBuilder;
    use crate::store::{QueryEvent, StoreError};
    use crate::testutils::{MemoryStore, RecordingMailer, file_request, record_request};
    use bytes::Bytes;

    fn worker(store: &Arc<MemoryStore>, mailer: &Arc<RecordingMailer>, ceiling: u64) -> Worker {
        let delivery = Arc::new(DeliveryRouter::new(
            DeliveryConfig::default(),
            store.clone(),
            mailer.clone(),
        ));
        Worker::new(
            store.clone(),
            delivery,
            &ExtractionConfig {
                size_ceiling_bytes: ceiling,
                ..Default::default()
            },
        )
    }

    fn record_job(key: &str) -> RetrievalJob {
        let request = record_request("5551234567", "SMS");
        let filter = QueryBuilder::new(&Default::default()).build(&request).unwrap();
        RetrievalJob::record(Arc::new(request), "company.archive", key, filter)
    }

    #[tokio::test]
    async fn test_record_job_attaches_extract() {
        let store = Arc::new(MemoryStore::default());
        store.script(
            "company.archive",
            "day.csv.gz",
            vec![
                Ok(QueryEvent::Records(Bytes::from_static(b"u1,5551234567,SMS\n"))),
                Ok(QueryEvent::End),
            ],
        );
        let mailer = Arc::new(RecordingMailer::default());

        let outcome = worker(&store, &mailer, 9_999_000)
            .run(&record_job("day.csv.gz"))
            .await;
        assert!(matches!(outcome, JobOutcome::Attached { .. }));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "company Data Request for 5551234567");
        match &sent[0].content {
            Content::Attachment { attachment, .. } => {
                assert_eq!(attachment.content_type, "application/gzip");
                assert_eq!(attachment.file_name, "day.csv.gz");
            }
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_query_sends_no_matching_records() {
        let store = Arc::new(MemoryStore::default());
        store.script("company.archive", "day.csv.gz", vec![Ok(QueryEvent::End)]);
        let mailer = Arc::new(RecordingMailer::default());

        let outcome = worker(&store, &mailer, 9_999_000)
            .run(&record_job("day.csv.gz"))
            .await;
        assert_eq!(
            outcome,
            JobOutcome::NoMatchingRecords {
                key: "day.csv.gz".into()
            }
        );

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].content, Content::Text(text) if text.contains("No records")));
    }

    #[tokio::test]
    async fn test_size_limit_is_reported_not_dropped() {
        let store = Arc::new(MemoryStore::default());
        store.script(
            "company.archive",
            "day.csv.gz",
            vec![
                Ok(QueryEvent::Records(Bytes::from_static(b"u1,5551234567,SMS\n"))),
                Ok(QueryEvent::End),
            ],
        );
        let mailer = Arc::new(RecordingMailer::default());

        let outcome = worker(&store, &mailer, 1).run(&record_job("day.csv.gz")).await;
        assert!(outcome.is_failure());

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].content, Content::Text(text) if text.contains("email limit")));
    }

    #[tokio::test]
    async fn test_stream_error_fails_only_that_job() {
        let store = Arc::new(MemoryStore::default());
        store.script(
            "company.archive",
            "broken.csv.gz",
            vec![Err(StoreError::EventStream("reset".into()))],
        );
        store.script("company.archive", "empty.csv.gz", vec![Ok(QueryEvent::End)]);
        let mailer = Arc::new(RecordingMailer::default());
        let worker = worker(&store, &mailer, 9_999_000);

        assert!(worker.run(&record_job("broken.csv.gz")).await.is_failure());
        assert!(!worker.run(&record_job("empty.csv.gz")).await.is_failure());
        assert_eq!(mailer.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_sends_failure_notice() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        let job = RetrievalJob::file(Arc::new(file_request("acme")), "archive", "gone.csv.gz");
        let outcome = worker(&store, &mailer, 9_999_000).run(&job).await;

        match outcome {
            JobOutcome::Failed { key, reason } => {
                assert_eq!(key, "gone.csv.gz");
                assert!(reason.contains("not found"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(mailer.sent().len(), 1);
    }
}
