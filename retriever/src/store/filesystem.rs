use super::{
    EVENT_CHANNEL_CAPACITY, ObjectStore, QueryEvent, QueryEvents, RecordQuery, StoreError,
};
use crate::query::FilterExpression;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;

/// Flush projected rows to the extractor in chunks of roughly this size.
const RECORD_CHUNK_BYTES: usize = 64 * 1024;

/// Object store rooted at a local directory, one sub-directory per bucket.
///
/// Record queries decompress the gzip CSV object and evaluate the filter
/// expression locally, producing the same event sequence as S3 Select.
#[derive(Clone, Debug)]
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FilesystemStore {
            base_dir: base_dir.into(),
        }
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        for part in [bucket, key] {
            let escapes = Path::new(part)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if part.is_empty() || escapes {
                return Err(StoreError::InvalidKey(format!("{bucket}/{key}")));
            }
        }
        Ok(self.base_dir.join(bucket).join(key))
    }
}

fn map_io(bucket: &str, key: &str, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let path = self.path(bucket, key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| map_io(bucket, key, e))?;
        Ok(Bytes::from(data))
    }

    async fn size(&self, bucket: &str, key: &str) -> Result<u64, StoreError> {
        let path = self.path(bucket, key)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_io(bucket, key, e))?;
        Ok(metadata.len())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let src = self.path(src_bucket, src_key)?;
        let dst = self.path(dst_bucket, dst_key)?;

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| map_io(src_bucket, src_key, e))?;
        Ok(())
    }
}

#[async_trait]
impl RecordQuery for FilesystemStore {
    async fn select(
        &self,
        bucket: &str,
        key: &str,
        filter: &FilterExpression,
    ) -> Result<QueryEvents, StoreError> {
        let path = self.path(bucket, key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(bucket, key, e))?;
        let bytes_processed = file.metadata().await?.len();
        let file = file.into_std().await;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            match scan(file, &filter, &tx) {
                Ok(true) => {
                    let _ = tx.blocking_send(Ok(QueryEvent::Stats { bytes_processed }));
                    let _ = tx.blocking_send(Ok(QueryEvent::End));
                }
                // Receiver dropped
                Ok(false) => {}
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        Ok(rx)
    }
}

/// Streams matching rows as record events. Returns `false` if the receiver went away.
fn scan(
    file: File,
    filter: &FilterExpression,
    tx: &mpsc::Sender<Result<QueryEvent, StoreError>>,
) -> Result<bool, StoreError> {
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(decoder);
    let mut writer = chunk_writer();

    for record in reader.records() {
        let record = record.map_err(|e| StoreError::EventStream(e.to_string()))?;
        let row: Vec<&str> = record.iter().collect();

        if !filter.matches(&row) {
            continue;
        }

        writer
            .write_record(filter.project(&row))
            .map_err(|e| StoreError::EventStream(e.to_string()))?;

        if writer.get_ref().len() >= RECORD_CHUNK_BYTES {
            let full = std::mem::replace(&mut writer, chunk_writer());
            if !send_chunk(full, tx)? {
                return Ok(false);
            }
        }
    }

    send_chunk(writer, tx)
}

fn chunk_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().from_writer(Vec::new())
}

fn send_chunk(
    writer: csv::Writer<Vec<u8>>,
    tx: &mpsc::Sender<Result<QueryEvent, StoreError>>,
) -> Result<bool, StoreError> {
    let chunk = writer
        .into_inner()
        .map_err(|e| StoreError::EventStream(e.to_string()))?;
    if chunk.is_empty() {
        return Ok(true);
    }
    Ok(tx
        .blocking_send(Ok(QueryEvent::Records(Bytes::from(chunk))))
        .is_ok())
}
