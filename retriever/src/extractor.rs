//! Record Extractor: drains one query event stream into a compressed artifact.
//!
//! Record chunks are appended to an in-memory accumulator, stats events only
//! update the processed byte counter, and the end event triggers
//! finalization. The whole stream is bounded by a deadline. Finalization
//! compresses header and body into a per-job scratch file, measures it
//! against the size ceiling and only then reads it back for encoding; the
//! scratch file is removed on every exit path.

use crate::config::ExtractionConfig;
use crate::delivery::file_name;
use crate::errors::{Result, RetrievalError};
use crate::store::{QueryEvent, QueryEvents};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::{Instant, sleep_until};

/// Compressed extract ready for attachment.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub compressed_size: u64,
    /// Base64 of the gzip payload
    pub encoded: String,
}

#[derive(Debug, PartialEq)]
pub enum Extraction {
    Artifact(Artifact),
    NoMatchingRecords,
}

#[derive(Default)]
struct Accumulator {
    body: Vec<u8>,
    bytes_processed: u64,
}

pub struct RecordExtractor {
    timeout: Duration,
    size_ceiling: u64,
    header: String,
}

impl RecordExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        RecordExtractor {
            timeout: Duration::from_secs(config.timeout_secs),
            size_ceiling: config.size_ceiling_bytes,
            header: config.header_line(),
        }
    }

    pub async fn extract(&self, key: &str, mut events: QueryEvents) -> Result<Extraction> {
        let deadline = Instant::now() + self.timeout;
        let mut acc = Accumulator::default();

        loop {
            let event = tokio::select! {
                _ = sleep_until(deadline) => {
                    return Err(RetrievalError::StreamTimeout {
                        key: key.to_string(),
                        secs: self.timeout.as_secs(),
                    });
                }
                event = events.recv() => event,
            };

            match event {
                Some(Ok(QueryEvent::Records(chunk))) => acc.body.extend_from_slice(&chunk),
                Some(Ok(QueryEvent::Stats { bytes_processed })) => {
                    acc.bytes_processed = bytes_processed;
                    tracing::debug!(key, bytes_processed, "query progress");
                }
                Some(Ok(QueryEvent::End)) => break,
                Some(Err(e)) => {
                    return Err(RetrievalError::StreamTransport {
                        key: key.to_string(),
                        reason: e.to_string(),
                    });
                }
                None => {
                    return Err(RetrievalError::StreamTransport {
                        key: key.to_string(),
                        reason: "event stream closed before end".to_string(),
                    });
                }
            }
        }
        // Stop the producer before the blocking work
        drop(events);

        if acc.body.is_empty() {
            tracing::info!(key, bytes_processed = acc.bytes_processed, "no records matched");
            return Ok(Extraction::NoMatchingRecords);
        }

        let header = self.header.clone();
        let ceiling = self.size_ceiling;
        let (compressed_size, compressed) =
            tokio::task::spawn_blocking(move || compress(&header, &acc.body, ceiling))
                .await
                .map_err(|e| RetrievalError::Internal(format!("compression task failed: {e}")))??;

        tracing::info!(key, compressed_size, "records extracted");
        Ok(Extraction::Artifact(Artifact {
            file_name: artifact_name(key),
            compressed_size,
            encoded: STANDARD.encode(compressed),
        }))
    }
}

/// Gzips `header\nbody` into a scratch file and enforces the ceiling.
fn compress(header: &str, body: &[u8], ceiling: u64) -> Result<(u64, Vec<u8>)> {
    let mut scratch = NamedTempFile::new()?;

    let mut encoder = GzEncoder::new(scratch.as_file_mut(), Compression::default());
    encoder.write_all(header.as_bytes())?;
    encoder.write_all(b"\n")?;
    encoder.write_all(body)?;
    encoder.finish()?;

    let size = scratch.as_file().metadata()?.len();
    if size >= ceiling {
        return Err(RetrievalError::SizeLimitExceeded { size, ceiling });
    }

    let file = scratch.as_file_mut();
    file.seek(SeekFrom::Start(0))?;
    let mut compressed = Vec::with_capacity(size as usize);
    file.read_to_end(&mut compressed)?;

    Ok((size, compressed))
}

fn artifact_name(key: &str) -> String {
    let name = file_name(key);
    if name.ends_with(".gz") {
        name
    } else {
        format!("{name}.gz")
    }
}
