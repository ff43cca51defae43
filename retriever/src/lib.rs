//! Request-to-artifact pipeline for archived message logs.
//!
//! An inbound request is classified, matched against the object-store
//! manifest and fanned out into one [`RetrievalJob`] per matching object.
//! File jobs deliver the object itself (attachment or staged link); record
//! jobs stream a server-side query, compress the rows and mail the result.

pub mod api;
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod extractor;
pub mod manifest;
pub mod metrics_defs;
pub mod orchestrator;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testutils;

pub use classifier::{Intent, classify};
pub use config::Config;
pub use errors::RetrievalError;
pub use types::{JobKind, JobOutcome, RetrievalJob, RetrievalRequest};
