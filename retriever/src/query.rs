//! Filter expressions for server-side record queries.
//!
//! A [`FilterExpression`] is built from the fields present on a request: one
//! base predicate chosen by priority, then refinements appended in a fixed
//! order. It renders to the SQL dialect of the object query interface and can
//! also be evaluated locally against a CSV row.

use crate::types::RetrievalRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum QueryBuildError {
    #[error("no query criteria supplied")]
    NoCriteria,
}

/// Column layout of the archived message logs.
///
/// Columns are referenced positionally (`_1` is the first field).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RecordSchema {
    /// Columns returned by every query, in output order.
    pub columns: Vec<String>,
    pub primary_id: String,
    pub secondary_id: String,
    pub message_type: String,
    pub timestamp: String,
    pub unique_id: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        RecordSchema {
            columns: ["_1", "_2", "_3", "_4", "_6", "_7", "_9", "_11", "_13", "_30", "_32"]
                .into_iter()
                .map(String::from)
                .collect(),
            primary_id: "_13".into(),
            secondary_id: "_30".into(),
            message_type: "_7".into(),
            timestamp: "_9".into(),
            unique_id: "_1".into(),
        }
    }
}

/// Zero-based field index for a positional column reference such as `_13`.
pub fn column_index(column: &str) -> Option<usize> {
    column
        .strip_prefix('_')?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    In { column: String, value: String },
    Eq { column: String, value: String },
    Between { column: String, low: String, high: String },
}

impl Predicate {
    fn column(&self) -> &str {
        match self {
            Predicate::In { column, .. }
            | Predicate::Eq { column, .. }
            | Predicate::Between { column, .. } => column,
        }
    }

    /// Evaluates the predicate against one row of fields.
    ///
    /// A row without the referenced field never matches.
    pub fn matches<S: AsRef<str>>(&self, row: &[S]) -> bool {
        let Some(field) = column_index(self.column()).and_then(|i| row.get(i)) else {
            return false;
        };
        let field = field.as_ref();

        match self {
            Predicate::In { value, .. } | Predicate::Eq { value, .. } => field == value,
            Predicate::Between { low, high, .. } => low.as_str() <= field && field <= high.as_str(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::In { column, value } => write!(f, "s.{column} IN ({})", quote(value)),
            Predicate::Eq { column, value } => write!(f, "s.{column} = {}", quote(value)),
            Predicate::Between { column, low, high } => {
                write!(f, "s.{column} BETWEEN {} AND {}", quote(low), quote(high))
            }
        }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Immutable predicate over the record schema plus the projected columns.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FilterExpression {
    pub columns: Vec<String>,
    pub base: Predicate,
    pub refinements: Vec<Predicate>,
}

impl FilterExpression {
    pub fn to_sql(&self) -> String {
        self.to_string()
    }

    pub fn matches<S: AsRef<str>>(&self, row: &[S]) -> bool {
        self.base.matches(row) && self.refinements.iter().all(|p| p.matches(row))
    }

    /// Projects the selected columns out of `row`; missing fields become empty.
    pub fn project<'a, S: AsRef<str>>(&self, row: &'a [S]) -> Vec<&'a str> {
        self.columns
            .iter()
            .map(|column| {
                column_index(column)
                    .and_then(|i| row.get(i))
                    .map(|field| field.as_ref())
                    .unwrap_or("")
            })
            .collect()
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<String> = self.columns.iter().map(|c| format!("s.{c}")).collect();
        write!(
            f,
            "SELECT {} FROM s3Object s WHERE {}",
            columns.join(", "),
            self.base
        )?;
        for refinement in &self.refinements {
            write!(f, " AND {refinement}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BaseField {
    Primary,
    Secondary,
    MessageType,
    UniqueId,
}

/// Composes filter expressions for one record schema.
pub struct QueryBuilder<'a> {
    schema: &'a RecordSchema,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a RecordSchema) -> Self {
        QueryBuilder { schema }
    }

    pub fn build(&self, request: &RetrievalRequest) -> Result<FilterExpression, QueryBuildError> {
        let schema = self.schema;

        let (base_field, base) = if let Some(primary) = &request.primary_id {
            (BaseField::Primary, in_clause(&schema.primary_id, primary))
        } else if let Some(secondary) = &request.secondary_id {
            (BaseField::Secondary, in_clause(&schema.secondary_id, secondary))
        } else if let Some(message_type) = &request.message_type {
            (BaseField::MessageType, eq_clause(&schema.message_type, message_type))
        } else if let Some(uid) = &request.message_uid {
            (BaseField::UniqueId, eq_clause(&schema.unique_id, uid))
        } else {
            return Err(QueryBuildError::NoCriteria);
        };

        let mut refinements = Vec::new();

        if base_field == BaseField::Primary
            && let Some(secondary) = &request.secondary_id
        {
            refinements.push(in_clause(&schema.secondary_id, secondary));
        }

        if let Some((start, end)) = request.date_range() {
            refinements.push(Predicate::Between {
                column: schema.timestamp.clone(),
                low: start.to_string(),
                high: end.to_string(),
            });
        }

        if base_field != BaseField::MessageType
            && let Some(message_type) = &request.message_type
        {
            refinements.push(eq_clause(&schema.message_type, message_type));
        }

        if base_field != BaseField::UniqueId
            && let Some(uid) = &request.message_uid
        {
            refinements.push(eq_clause(&schema.unique_id, uid));
        }

        Ok(FilterExpression {
            columns: schema.columns.clone(),
            base,
            refinements,
        })
    }
}

fn in_clause(column: &str, value: &str) -> Predicate {
    Predicate::In {
        column: column.to_string(),
        value: value.to_string(),
    }
}

fn eq_clause(column: &str, value: &str) -> Predicate {
    Predicate::Eq {
        column: column.to_string(),
        value: value.to_string(),
    }
}
