use crate::types::RetrievalRequest;
use http::StatusCode;

/// What an inbound request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Whole objects for an entity, no record-level criteria.
    FileRetrieval,
    /// Record-level query; takes precedence over entity fields.
    RecordRetrieval,
    /// No usable field supplied.
    Rejected,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FileRetrieval => "file",
            Intent::RecordRetrieval => "record",
            Intent::Rejected => "rejected",
        }
    }
}

pub fn classify(request: &RetrievalRequest) -> Intent {
    if request.has_record_criteria() {
        Intent::RecordRetrieval
    } else if request.has_entity_criteria() {
        Intent::FileRetrieval
    } else {
        Intent::Rejected
    }
}

/// Immediate reply to the submitting caller, sent before any retrieval work.
#[derive(Clone, Debug, PartialEq)]
pub struct Acknowledgment {
    pub status: StatusCode,
    pub message: String,
}

impl Acknowledgment {
    pub fn new(intent: Intent, request: &RetrievalRequest) -> Self {
        match intent {
            Intent::FileRetrieval => Acknowledgment {
                status: StatusCode::OK,
                message: format!(
                    "Files for {} are being retrieved",
                    request.entity_fields().join(" ")
                ),
            },
            Intent::RecordRetrieval => Acknowledgment {
                status: StatusCode::OK,
                message: format!(
                    "Messages for {} are being retrieved",
                    request.record_fields().join(" ")
                ),
            },
            Intent::Rejected => Acknowledgment {
                status: StatusCode::BAD_GATEWAY,
                message: "The proper information was not supplied".to_string(),
            },
        }
    }
}
