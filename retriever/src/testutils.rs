use crate::config::Config;
use crate::delivery::{Email, MailError, Mailer};
use crate::manifest::DateWindow;
use crate::query::FilterExpression;
use crate::store::{ObjectStore, QueryEvent, QueryEvents, RecordQuery, StoreError};
use crate::types::RetrievalRequest;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

type ObjectKey = (String, String);

fn object_key(bucket: &str, key: &str) -> ObjectKey {
    (bucket.to_string(), key.to_string())
}

/// In-memory object store whose record queries replay scripted events.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectKey, Bytes>>,
    scripts: Mutex<HashMap<ObjectKey, Vec<Result<QueryEvent, StoreError>>>>,
}

impl MemoryStore {
    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(bucket, key), Bytes::copy_from_slice(data));
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&object_key(bucket, key))
    }

    /// Events replayed by the next query against `bucket/key`.
    pub fn script(&self, bucket: &str, key: &str, events: Vec<Result<QueryEvent, StoreError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(object_key(bucket, key), events);
    }

    fn not_found(bucket: &str, key: &str) -> StoreError {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_key(bucket, key))
            .cloned()
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn size(&self, bucket: &str, key: &str) -> Result<u64, StoreError> {
        Ok(self.get(bucket, key).await?.len() as u64)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let data = self.get(src_bucket, src_key).await?;
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(dst_bucket, dst_key), data);
        Ok(())
    }
}

#[async_trait]
impl RecordQuery for MemoryStore {
    async fn select(
        &self,
        bucket: &str,
        key: &str,
        _filter: &FilterExpression,
    ) -> Result<QueryEvents, StoreError> {
        let events = self
            .scripts
            .lock()
            .unwrap()
            .remove(&object_key(bucket, key))
            .ok_or_else(|| Self::not_found(bucket, key))?;

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        Ok(rx)
    }
}

/// Mailer that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    rejected_subject: Option<String>,
}

impl RecordingMailer {
    /// Refuses, like a busy relay, every message whose subject starts with `prefix`.
    pub fn rejecting(prefix: &str) -> Self {
        RecordingMailer {
            rejected_subject: Some(prefix.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if let Some(prefix) = &self.rejected_subject
            && email.subject.starts_with(prefix.as_str())
        {
            return Err(MailError::Rejected {
                status: 503,
                body: "busy".to_string(),
            });
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn file_request(entity_name: &str) -> RetrievalRequest {
    RetrievalRequest {
        entity_name: Some(entity_name.to_string()),
        email: Some("ops@example.com".to_string()),
        ..Default::default()
    }
}

pub fn record_request(primary_id: &str, message_type: &str) -> RetrievalRequest {
    RetrievalRequest {
        primary_id: Some(primary_id.to_string()),
        message_type: Some(message_type.to_string()),
        email: Some("ops@example.com".to_string()),
        ..Default::default()
    }
}

/// Defaults plus a date window matching keys like `logs-2024-01-15-acme.csv.gz`.
pub fn test_config() -> Config {
    let mut config: Config =
        serde_yaml::from_str("mailer: {url: 'http://127.0.0.1:8025/send'}").unwrap();
    config.manifest.date_window = DateWindow {
        offset: 5,
        length: 10,
    };
    config
}
