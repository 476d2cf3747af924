//! Decision and summary records plus the append-only `Feed` collection.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;

/// Stable key of a decision across runs (the absolute opinion URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecisionId(String);

impl DecisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One scraped Supreme Court opinion.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRecord {
    pub id: DecisionId,
    pub title: String,
    pub url: String,
    pub decided: Option<NaiveDate>,
    pub docket: Option<String>,
    /// Raw listing line ("No. 23-1234 ... decided date: June 5, 2025")
    pub meta: String,
    /// HTML body of the decision feed item, built once when first published
    pub description: String,
}

impl DecisionRecord {
    /// Builds a record keyed by its opinion URL.
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: DecisionId::new(url.clone()),
            title: title.into(),
            url,
            decided: None,
            docket: None,
            meta: String::new(),
            description: String::new(),
        }
    }

    pub fn with_decided(mut self, decided: Option<NaiveDate>) -> Self {
        self.decided = decided;
        self
    }

    pub fn with_docket(mut self, docket: Option<String>) -> Self {
        self.docket = docket;
        self
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Publication timestamp: the decided date at noon UTC, so readers in US
    /// time zones do not show the previous day.
    pub fn pub_date(&self) -> Option<DateTime<Utc>> {
        self.decided
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// AI-generated summary of one decision. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub id: DecisionId,
    pub text: String,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

/// A summary paired with the decision it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub decision: DecisionRecord,
    pub summary: SummaryRecord,
}

/// Anything that can live in a `Feed`.
pub trait FeedItem {
    fn id(&self) -> &DecisionId;
}

impl FeedItem for DecisionRecord {
    fn id(&self) -> &DecisionId {
        &self.id
    }
}

impl FeedItem for SummaryEntry {
    fn id(&self) -> &DecisionId {
        &self.decision.id
    }
}

/// Append-only ordered log of entries, oldest first. Identifiers are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed<T> {
    entries: Vec<T>,
    index: HashMap<DecisionId, usize>,
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: FeedItem> Feed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` unless its identifier is already present.
    /// Returns whether the item was appended.
    pub fn append(&mut self, item: T) -> bool {
        if self.index.contains_key(item.id()) {
            return false;
        }
        self.index.insert(item.id().clone(), self.entries.len());
        self.entries.push(item);
        true
    }

    pub fn contains(&self, id: &DecisionId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &DecisionId) -> Option<&T> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
