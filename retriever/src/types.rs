use crate::query::FilterExpression;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A parsed inbound submission.
///
/// Field names accept both the neutral form (`primaryId`, `entityName`, ...)
/// and the legacy form names (`mdn`, `company`, ...). Empty values count as
/// absent, so every accessor only ever sees meaningful input.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalRequest {
    #[serde(
        default,
        alias = "mdn",
        alias = "telephone",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_id: Option<String>,

    #[serde(
        default,
        alias = "campaign",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub secondary_id: Option<String>,

    #[serde(
        default,
        alias = "company",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_name: Option<String>,

    #[serde(
        default,
        alias = "shortcode",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_code: Option<String>,

    #[serde(
        default,
        alias = "message_type",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_type: Option<String>,

    #[serde(
        default,
        alias = "message_uid",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_uid: Option<String>,

    #[serde(
        default,
        alias = "start_date",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<String>,

    #[serde(
        default,
        alias = "end_date",
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<String>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub email: Option<String>,

    #[serde(default, deserialize_with = "truthy", skip_serializing)]
    pub honeypot: bool,
}

impl RetrievalRequest {
    /// True when any record-level discriminator is supplied.
    pub fn has_record_criteria(&self) -> bool {
        self.primary_id.is_some()
            || self.secondary_id.is_some()
            || self.message_type.is_some()
            || self.message_uid.is_some()
    }

    pub fn has_entity_criteria(&self) -> bool {
        self.entity_name.is_some() || self.entity_code.is_some()
    }

    /// Start and end of the requested range, only when both are supplied.
    pub fn date_range(&self) -> Option<(&str, &str)> {
        match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Label used in notification subjects.
    pub fn subject_label(&self) -> Option<&str> {
        self.primary_id
            .as_deref()
            .or(self.entity_name.as_deref())
            .or(self.entity_code.as_deref())
            .or(self.secondary_id.as_deref())
    }

    /// Path segment grouping staged copies of oversized files.
    pub fn entity_label(&self) -> &str {
        self.entity_name
            .as_deref()
            .or(self.entity_code.as_deref())
            .or(self.subject_label())
            .unwrap_or("unlabeled")
    }

    pub(crate) fn entity_fields(&self) -> Vec<&str> {
        [&self.entity_name, &self.entity_code]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .collect()
    }

    pub(crate) fn record_fields(&self) -> Vec<&str> {
        [
            &self.primary_id,
            &self.secondary_id,
            &self.message_type,
            &self.message_uid,
        ]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .collect()
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    })
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    File,
    Record { filter: FilterExpression },
}

/// One unit of per-object work derived from a request and a manifest match.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RetrievalJob {
    pub request: Arc<RetrievalRequest>,
    pub bucket: String,
    pub key: String,
    pub kind: JobKind,
}

impl RetrievalJob {
    pub fn file(request: Arc<RetrievalRequest>, bucket: &str, key: &str) -> Self {
        RetrievalJob {
            request,
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind: JobKind::File,
        }
    }

    pub fn record(
        request: Arc<RetrievalRequest>,
        bucket: &str,
        key: &str,
        filter: FilterExpression,
    ) -> Self {
        RetrievalJob {
            request,
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind: JobKind::Record { filter },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            JobKind::File => "file",
            JobKind::Record { .. } => "record",
        }
    }
}

/// Terminal state of a job, reported back to whoever dispatched it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Attached { key: String, bytes: u64 },
    Linked { key: String, location: String },
    NoMatchingRecords { key: String },
    Failed { key: String, reason: String },
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}
