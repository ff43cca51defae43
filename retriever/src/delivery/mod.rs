//! Delivery Router: turns job results into outbound notifications.
//!
//! File jobs attach the object when it is below the attachment threshold and
//! otherwise copy it into the staging bucket and send a link. Record extracts
//! are always attached. Every other terminal state of a job or request has
//! its own plain notice.

pub mod email;
pub mod mailer;

pub use email::{Attachment, Content, Email};
pub use mailer::{HttpMailer, MailError, Mailer};

use crate::config::DeliveryConfig;
use crate::errors::{Result, RetrievalError};
use crate::extractor::Artifact;
use crate::store::ObjectStore;
use crate::types::{JobOutcome, RetrievalJob, RetrievalRequest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

const FILE_CONTENT_TYPE: &str = "application/zip";
const EXTRACT_CONTENT_TYPE: &str = "application/gzip";

pub struct DeliveryRouter {
    config: DeliveryConfig,
    objects: Arc<dyn ObjectStore>,
    mailer: Arc<dyn Mailer>,
}

impl DeliveryRouter {
    pub fn new(
        config: DeliveryConfig,
        objects: Arc<dyn ObjectStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        DeliveryRouter {
            config,
            objects,
            mailer,
        }
    }

    /// Delivers a whole object, as an attachment or as a staged link.
    pub async fn deliver_file(&self, job: &RetrievalJob) -> Result<JobOutcome> {
        let request = &job.request;
        let to = self.recipient(request)?;
        let size = self.objects.size(&job.bucket, &job.key).await?;

        if size < self.config.attachment_threshold_bytes {
            let data = self.objects.get(&job.bucket, &job.key).await?;
            let attachment = Attachment {
                file_name: file_name(&job.key),
                content_type: FILE_CONTENT_TYPE,
                encoded: STANDARD.encode(&data),
            };
            self.send_attachment(request, to, attachment).await?;

            tracing::info!(bucket = %job.bucket, key = %job.key, size, "file attached");
            return Ok(JobOutcome::Attached {
                key: job.key.clone(),
                bytes: size,
            });
        }

        let entity = request.entity_label();
        let staged_key = format!("{entity}/{}", job.key);
        self.objects
            .copy(&job.bucket, &job.key, &self.config.staging_bucket, &staged_key)
            .await?;

        let location = format!(
            "{}/{staged_key}",
            self.config.link_base_url.trim_end_matches('/')
        );
        let email = self.email(
            to,
            self.subject(request),
            Content::Alternative {
                text: format!("Please look in: {location}"),
                html: format!("<p>Please look in: {location}</p>"),
            },
        );
        self.mailer.send(&email).await?;

        tracing::info!(bucket = %job.bucket, key = %job.key, size, %location, "file staged");
        Ok(JobOutcome::Linked {
            key: job.key.clone(),
            location,
        })
    }

    /// Attaches a compressed record extract.
    pub async fn deliver_artifact(
        &self,
        job: &RetrievalJob,
        artifact: Artifact,
    ) -> Result<JobOutcome> {
        let to = self.recipient(&job.request)?;
        let bytes = artifact.compressed_size;
        let attachment = Attachment {
            file_name: artifact.file_name,
            content_type: EXTRACT_CONTENT_TYPE,
            encoded: artifact.encoded,
        };
        self.send_attachment(&job.request, to, attachment).await?;

        Ok(JobOutcome::Attached {
            key: job.key.clone(),
            bytes,
        })
    }

    /// Lists every matched entry ahead of the per-file emails.
    pub async fn send_file_list(
        &self,
        request: &RetrievalRequest,
        entries: &[String],
    ) -> Result<()> {
        let to = self.recipient(request)?;
        let listing: Vec<String> = entries
            .iter()
            .map(|entry| format!("{}{entry}", self.config.filelist_location_prefix))
            .collect();

        let email = self.email(
            to,
            "File list per your latest request".to_string(),
            Content::Text(format!(
                "The below files should be sent via individual emails shortly:\n{}",
                listing.join("\n")
            )),
        );
        Ok(self.mailer.send(&email).await?)
    }

    pub async fn send_no_files_found(&self, request: &RetrievalRequest) -> Result<()> {
        self.notice(
            request,
            "No files matching your request were found.".to_string(),
        )
        .await
    }

    pub async fn send_no_matching_records(&self, job: &RetrievalJob) -> Result<()> {
        self.notice(
            &job.request,
            format!("No records matching your request were found in {}.", job.key),
        )
        .await
    }

    pub async fn send_failure(&self, job: &RetrievalJob, reason: &str) -> Result<()> {
        self.notice(
            &job.request,
            format!("Retrieval of {} could not be completed: {reason}.", job.key),
        )
        .await
    }

    /// `<prefix> Data Request for <label>`
    pub fn subject(&self, request: &RetrievalRequest) -> String {
        let label = request.subject_label().unwrap_or("your request");
        if self.config.subject_prefix.is_empty() {
            format!("Data Request for {label}")
        } else {
            format!("{} Data Request for {label}", self.config.subject_prefix)
        }
    }

    /// The request's own address, else the configured default.
    pub fn recipient(&self, request: &RetrievalRequest) -> Result<String> {
        request
            .email
            .clone()
            .or_else(|| self.config.default_recipient.clone())
            .ok_or(RetrievalError::NoRecipient)
    }

    async fn notice(&self, request: &RetrievalRequest, text: String) -> Result<()> {
        let to = self.recipient(request)?;
        let email = self.email(to, self.subject(request), Content::Text(text));
        Ok(self.mailer.send(&email).await?)
    }

    async fn send_attachment(
        &self,
        request: &RetrievalRequest,
        to: String,
        attachment: Attachment,
    ) -> Result<()> {
        let email = self.email(
            to,
            self.subject(request),
            Content::Attachment {
                intro_html: "<p>Please see your attached file.</p>".to_string(),
                attachment,
            },
        );
        Ok(self.mailer.send(&email).await?)
    }

    fn email(&self, to: String, subject: String, content: Content) -> Email {
        Email {
            from: self.config.sender.clone(),
            reply_to: self.config.reply_to.clone(),
            to: vec![to],
            subject,
            content,
        }
    }
}

/// Attachment name for an object key: its last path segment.
pub(crate) fn file_name(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MemoryStore, RecordingMailer, file_request};

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            attachment_threshold_bytes: 10,
            staging_bucket: "staging".into(),
            link_base_url: "https://files.example.com/".into(),
            filelist_location_prefix: "s3://archive/".into(),
            ..Default::default()
        }
    }

    fn router(store: &Arc<MemoryStore>, mailer: &Arc<RecordingMailer>) -> DeliveryRouter {
        DeliveryRouter::new(config(), store.clone(), mailer.clone())
    }

    #[tokio::test]
    async fn test_small_file_is_attached() {
        let store = Arc::new(MemoryStore::default());
        store.put("archive", "logs/2024-01-15-acme.csv.gz", b"tiny");
        let mailer = Arc::new(RecordingMailer::default());

        let job = RetrievalJob::file(
            Arc::new(file_request("acme")),
            "archive",
            "logs/2024-01-15-acme.csv.gz",
        );
        let outcome = router(&store, &mailer).deliver_file(&job).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Attached {
                key: "logs/2024-01-15-acme.csv.gz".into(),
                bytes: 4
            }
        );

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "company Data Request for acme");
        assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
        match &sent[0].content {
            Content::Attachment { attachment, .. } => {
                assert_eq!(attachment.file_name, "2024-01-15-acme.csv.gz");
                assert_eq!(attachment.content_type, "application/zip");
                assert_eq!(attachment.encoded, STANDARD.encode(b"tiny"));
            }
            other => panic!("expected attachment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_file_is_staged_and_linked() {
        let store = Arc::new(MemoryStore::default());
        store.put("archive", "big.csv.gz", &[0u8; 10]);
        let mailer = Arc::new(RecordingMailer::default());

        let job = RetrievalJob::file(Arc::new(file_request("acme")), "archive", "big.csv.gz");
        let outcome = router(&store, &mailer).deliver_file(&job).await.unwrap();

        assert_eq!(
            outcome,
            JobOutcome::Linked {
                key: "big.csv.gz".into(),
                location: "https://files.example.com/acme/big.csv.gz".into()
            }
        );
        assert!(store.contains("staging", "acme/big.csv.gz"));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].content {
            Content::Alternative { text, .. } => {
                assert_eq!(text, "Please look in: https://files.example.com/acme/big.csv.gz")
            }
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_list_prefixes_entries() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());

        router(&store, &mailer)
            .send_file_list(&file_request("acme"), &["a.csv.gz".into(), "b.csv.gz".into()])
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent[0].subject, "File list per your latest request");
        assert_eq!(
            sent[0].content,
            Content::Text(
                "The below files should be sent via individual emails shortly:\n\
                 s3://archive/a.csv.gz\ns3://archive/b.csv.gz"
                    .into()
            )
        );
    }

    #[tokio::test]
    async fn test_recipient_fallback() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let mut request = file_request("acme");
        request.email = None;

        let without_default = router(&store, &mailer);
        assert!(matches!(
            without_default.send_no_files_found(&request).await,
            Err(RetrievalError::NoRecipient)
        ));

        let with_default = DeliveryRouter::new(
            DeliveryConfig {
                default_recipient: Some("end.user@business.com".into()),
                ..config()
            },
            store,
            mailer.clone(),
        );
        with_default.send_no_files_found(&request).await.unwrap();
        assert_eq!(mailer.sent()[0].to, vec!["end.user@business.com".to_string()]);
    }

    #[test]
    fn test_subject_without_prefix() {
        let store = Arc::new(MemoryStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let router = DeliveryRouter::new(
            DeliveryConfig {
                subject_prefix: String::new(),
                ..config()
            },
            store,
            mailer,
        );
        assert_eq!(
            router.subject(&RetrievalRequest::default()),
            "Data Request for your request"
        );
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("a/b/c.csv.gz"), "c.csv.gz");
        assert_eq!(file_name("c.csv.gz"), "c.csv.gz");
    }
}
