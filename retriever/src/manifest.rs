//! Selection of candidate objects from the manifest.
//!
//! The manifest is a newline-delimited list of object keys. Every key embeds
//! the entity it belongs to and a date token at a fixed character window.

use crate::types::RetrievalRequest;
use chrono::NaiveDate;
use serde::Deserialize;

/// Character window of the date token inside a manifest key.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct DateWindow {
    pub offset: usize,
    pub length: usize,
}

impl Default for DateWindow {
    fn default() -> Self {
        DateWindow {
            offset: 13,
            length: 7,
        }
    }
}

impl DateWindow {
    /// Extracts and parses the date token of `entry`.
    ///
    /// Returns `None` when the entry is too short or the token is not a date.
    pub fn date_of(&self, entry: &str) -> Option<NaiveDate> {
        let end = self.offset.checked_add(self.length)?;
        let token = entry.get(self.offset..end)?;
        parse_date(token)
    }
}

/// Parses `YYYY-MM-DD`, `YYYYMMDD` or `YYYY-MM` (first of the month).
pub fn parse_date(token: &str) -> Option<NaiveDate> {
    let token = token.trim();
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y%m%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{token}-01"), "%Y-%m-%d"))
        .ok()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    pub fn parse(body: &str) -> Self {
        let entries = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        Manifest { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entries matching `request`, in manifest order.
    pub fn select(&self, request: &RetrievalRequest, window: DateWindow) -> Vec<String> {
        let range = match request.date_range() {
            None => None,
            Some((start, end)) => match (parse_date(start), parse_date(end)) {
                (Some(start), Some(end)) => Some((start, end)),
                _ => {
                    tracing::warn!(start, end, "unparsable date range, nothing can match");
                    return Vec::new();
                }
            },
        };

        self.entries
            .iter()
            .filter(|entry| matches_identity(entry, request))
            .filter(|entry| match range {
                None => true,
                Some((start, end)) => window
                    .date_of(entry)
                    .is_some_and(|date| start <= date && date <= end),
            })
            .cloned()
            .collect()
    }
}

/// An entry matches when it contains the entity name or, if given, the entity code.
///
/// A request naming neither matches every entry; its record query narrows
/// the rows instead.
fn matches_identity(entry: &str, request: &RetrievalRequest) -> bool {
    if !request.has_entity_criteria() {
        return true;
    }

    let by_name = request
        .entity_name
        .as_deref()
        .is_some_and(|name| entry.contains(name));
    let by_code = request
        .entity_code
        .as_deref()
        .is_some_and(|code| entry.contains(code));

    by_name || by_code
}
