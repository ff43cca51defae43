use crate::manifest::DateWindow;
use crate::query::RecordSchema;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty bucket name for {0}")]
    EmptyBucket(&'static str),

    #[error("Date window length cannot be 0")]
    EmptyDateWindow,

    #[error("Sender address cannot be empty")]
    EmptySender,

    #[error("{0} must be greater than 0")]
    ZeroLimit(&'static str),

    #[error("Record schema column is not a positional reference: {0}")]
    InvalidColumn(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Location of the manifest object and of the date token inside its keys.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManifestConfig {
    pub bucket: String,
    pub key: String,
    pub date_window: DateWindow,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        ManifestConfig {
            bucket: "company.messagelogs".into(),
            key: "fileList.txt".into(),
            date_window: DateWindow::default(),
        }
    }
}

/// Buckets holding the objects named by the manifest.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Buckets {
    /// Source of whole-file retrievals
    pub files: String,
    /// Source of record queries
    pub records: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Buckets {
            files: "archive".into(),
            records: "company.archive".into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    S3 {
        region: Option<String>,
        endpoint: Option<String>,
    },
    Filesystem {
        base_dir: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::S3 {
            region: None,
            endpoint: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum DispatchConfig {
    /// Jobs run on this node
    #[default]
    InProcess,
    /// Jobs are posted to a remote retrieval service
    Http {
        url: Url,
        #[serde(default = "default_dispatch_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_dispatch_timeout_secs() -> u64 {
    900
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Upper bound on the whole query event stream
    pub timeout_secs: u64,
    /// Largest compressed artifact that may be sent
    pub size_ceiling_bytes: u64,
    pub schema: RecordSchema,
    /// Header line prepended to every extract; defaults to the column list.
    pub header: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            timeout_secs: 300,
            size_ceiling_bytes: 9_999_000,
            schema: RecordSchema::default(),
            header: None,
        }
    }
}

impl ExtractionConfig {
    pub fn header_line(&self) -> String {
        self.header
            .clone()
            .unwrap_or_else(|| self.schema.columns.join(","))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// `From:` header, e.g. `DR <dr@company.com>`
    pub sender: String,
    pub reply_to: Option<String>,
    pub subject_prefix: String,
    /// Files at or above this size are staged and linked instead of attached
    pub attachment_threshold_bytes: u64,
    pub staging_bucket: String,
    pub link_base_url: String,
    /// Prepended to every entry of a file-list notice
    pub filelist_location_prefix: String,
    /// Used when a request carries no address of its own
    pub default_recipient: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            sender: "DR <dr@company.com>".into(),
            reply_to: Some("dr@company.com".into()),
            subject_prefix: "company".into(),
            attachment_threshold_bytes: 9_300_000,
            staging_bucket: "archive".into(),
            link_base_url: "https://s3.location.amazonaws.com".into(),
            filelist_location_prefix: String::new(),
            default_recipient: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MailerConfig {
    pub url: Url,
    #[serde(default = "default_mailer_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mailer_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub buckets: Buckets,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub mailer: MailerConfig,
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        for (name, bucket) in [
            ("manifest", &self.manifest.bucket),
            ("files", &self.buckets.files),
            ("records", &self.buckets.records),
            ("staging", &self.delivery.staging_bucket),
        ] {
            if bucket.is_empty() {
                return Err(ValidationError::EmptyBucket(name));
            }
        }

        if self.manifest.date_window.length == 0 {
            return Err(ValidationError::EmptyDateWindow);
        }

        if self.delivery.sender.trim().is_empty() {
            return Err(ValidationError::EmptySender);
        }

        for (name, value) in [
            ("extraction.timeout_secs", self.extraction.timeout_secs),
            ("extraction.size_ceiling_bytes", self.extraction.size_ceiling_bytes),
            (
                "delivery.attachment_threshold_bytes",
                self.delivery.attachment_threshold_bytes,
            ),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroLimit(name));
            }
        }

        let schema = &self.extraction.schema;
        for column in schema.columns.iter().chain([
            &schema.primary_id,
            &schema.secondary_id,
            &schema.message_type,
            &schema.timestamp,
            &schema.unique_id,
        ]) {
            if crate::query::column_index(column).is_none() {
                return Err(ValidationError::InvalidColumn(column.clone()));
            }
        }

        Ok(())
    }
}
