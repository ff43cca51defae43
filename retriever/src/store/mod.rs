//! Object store and record query collaborators.
//!
//! The pipeline only talks to these traits. `S3Store` backs production,
//! `FilesystemStore` keeps one directory per bucket and evaluates record
//! queries locally.

mod filesystem;
mod s3;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

use crate::config::StoreConfig;
use crate::query::FilterExpression;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("request to {bucket}/{key} failed: {reason}")]
    Request {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("query event stream error: {0}")]
    EventStream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One event of a streamed record query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    /// Raw output bytes; may hold several records or a partial one.
    Records(Bytes),
    Stats { bytes_processed: u64 },
    End,
}

pub type QueryEvents = mpsc::Receiver<Result<QueryEvent, StoreError>>;

/// Capacity of the channel carrying query events to the extractor.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn size(&self, bucket: &str, key: &str) -> Result<u64, StoreError>;

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RecordQuery: Send + Sync {
    /// Starts a server-side query and returns its event stream.
    async fn select(
        &self,
        bucket: &str,
        key: &str,
        filter: &FilterExpression,
    ) -> Result<QueryEvents, StoreError>;
}

/// Handles to the configured backend, once per concern.
#[derive(Clone)]
pub struct Backend {
    pub objects: Arc<dyn ObjectStore>,
    pub query: Arc<dyn RecordQuery>,
}

impl Backend {
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: ObjectStore + RecordQuery + 'static,
    {
        Backend {
            objects: backend.clone(),
            query: backend,
        }
    }
}

pub async fn build_backend(config: &StoreConfig) -> Result<Backend, StoreError> {
    match config {
        StoreConfig::S3 { region, endpoint } => {
            let store = S3Store::new(region.as_deref(), endpoint.as_deref()).await;
            Ok(Backend::new(Arc::new(store)))
        }
        StoreConfig::Filesystem { base_dir } => {
            Ok(Backend::new(Arc::new(FilesystemStore::new(base_dir))))
        }
    }
}
