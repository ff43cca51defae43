use super::{
    EVENT_CHANNEL_CAPACITY, ObjectStore, QueryEvent, QueryEvents, RecordQuery, StoreError,
};
use crate::query::FilterExpression;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::operation::select_object_content::SelectObjectContentOutput;
use aws_sdk_s3::types::{
    CompressionType, CsvInput, CsvOutput, ExpressionType, FileHeaderInfo, InputSerialization,
    OutputSerialization, SelectObjectContentEventStream,
};
use bytes::Bytes;
use tokio::sync::mpsc;

/// S3 backed object store using S3 Select for record queries.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Create a client for `region`, optionally against a custom endpoint (LocalStack).
    pub async fn new(region: Option<&str>, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;

        // Path-style addressing for custom endpoints
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        S3Store {
            client: Client::from_conf(s3_config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        S3Store { client }
    }
}

fn request_error(bucket: &str, key: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Request {
        bucket: bucket.to_string(),
        key: key.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        tracing::debug!(bucket, key, "downloading object");

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    request_error(bucket, key, aws_sdk_s3::error::DisplayErrorContext(e))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| request_error(bucket, key, e))?;

        Ok(data.into_bytes())
    }

    async fn size(&self, bucket: &str, key: &str) -> Result<u64, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error(bucket, key, aws_sdk_s3::error::DisplayErrorContext(e)))?;

        Ok(output.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        tracing::debug!(src_bucket, src_key, dst_bucket, dst_key, "copying object");

        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(format!("{src_bucket}/{src_key}"))
            .send()
            .await
            .map_err(|e| {
                request_error(src_bucket, src_key, aws_sdk_s3::error::DisplayErrorContext(e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl RecordQuery for S3Store {
    async fn select(
        &self,
        bucket: &str,
        key: &str,
        filter: &FilterExpression,
    ) -> Result<QueryEvents, StoreError> {
        let input = InputSerialization::builder()
            .csv(
                CsvInput::builder()
                    .allow_quoted_record_delimiter(true)
                    .field_delimiter(",")
                    .file_header_info(FileHeaderInfo::None)
                    .record_delimiter("\n")
                    .quote_character("\"")
                    .quote_escape_character("\\")
                    .build(),
            )
            .compression_type(CompressionType::Gzip)
            .build();
        let output = OutputSerialization::builder()
            .csv(CsvOutput::builder().build())
            .build();

        let sql = filter.to_sql();
        tracing::debug!(bucket, key, %sql, "starting select");

        let response = self
            .client
            .select_object_content()
            .bucket(bucket)
            .key(key)
            .expression(sql)
            .expression_type(ExpressionType::Sql)
            .input_serialization(input)
            .output_serialization(output)
            .send()
            .await
            .map_err(|e| request_error(bucket, key, aws_sdk_s3::error::DisplayErrorContext(e)))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(forward(SelectPayload(response), tx));

        Ok(rx)
    }
}

/// Pull side of a select event stream.
#[async_trait]
trait EventSource: Send {
    /// `Ok(None)` once the stream is exhausted.
    async fn next_event(&mut self) -> Result<Option<QueryEvent>, StoreError>;
}

struct SelectPayload(SelectObjectContentOutput);

#[async_trait]
impl EventSource for SelectPayload {
    async fn next_event(&mut self) -> Result<Option<QueryEvent>, StoreError> {
        loop {
            let event = match self.0.payload.recv().await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(None),
                Err(e) => {
                    let reason = aws_sdk_s3::error::DisplayErrorContext(e).to_string();
                    return Err(StoreError::EventStream(reason));
                }
            };

            let converted = match event {
                SelectObjectContentEventStream::Records(records) => records
                    .payload()
                    .map(|blob| QueryEvent::Records(Bytes::copy_from_slice(blob.as_ref()))),
                SelectObjectContentEventStream::Stats(stats) => {
                    stats.details().map(|details| QueryEvent::Stats {
                        bytes_processed: details.bytes_processed().unwrap_or(0).max(0) as u64,
                    })
                }
                SelectObjectContentEventStream::End(_) => Some(QueryEvent::End),
                // Progress and continuation events carry nothing the extractor uses
                _ => None,
            };

            if converted.is_some() {
                return Ok(converted);
            }
        }
    }
}

/// Forwards `source` into `tx` until the stream ends or the receiver goes away.
///
/// The receiver owns the deadline. Dropping it ends this task even while the
/// source is stalled, which releases the underlying connection.
async fn forward<S: EventSource>(
    mut source: S,
    tx: mpsc::Sender<Result<QueryEvent, StoreError>>,
) {
    loop {
        let next = tokio::select! {
            _ = tx.closed() => break,
            next = source.next_event() => next,
        };

        match next {
            Ok(Some(event)) => {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}
