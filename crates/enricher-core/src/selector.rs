//! Entry selection for extraction and merge.
//!
//! Selection is a pure function of the entry and the selector's settings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Entry;

/// Caller-supplied filter evaluated after the declarative rules.
pub type EntryPredicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

/// Declarative filter rules, loadable from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    /// Columns that must hold a non-blank value.
    #[serde(default)]
    pub require_non_empty: Vec<String>,
    /// Columns that must be blank.
    #[serde(default)]
    pub require_empty: Vec<String>,
    /// When set, only these keys are selected.
    #[serde(default)]
    pub keys: Option<Vec<String>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(ref keys) = self.keys {
            if !keys.iter().any(|k| k == entry.key()) {
                return false;
            }
        }
        self.require_non_empty.iter().all(|c| !entry.is_blank(c))
            && self.require_empty.iter().all(|c| entry.is_blank(c))
    }
}

/// Why an entry was not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoKey,
    /// The tag column holds a protected value.
    Protected(String),
    Filtered,
    SourceTooShort {
        len: usize,
        min: usize,
    },
    /// Merge found no cached response for the entry.
    NotCached,
    /// No inference service is configured.
    NoService,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoKey => write!(f, "no key"),
            SkipReason::Protected(tag) => write!(f, "protected ({})", tag),
            SkipReason::Filtered => write!(f, "filtered"),
            SkipReason::SourceTooShort { len, min } => {
                write!(f, "source text too short ({} < {} chars)", len, min)
            }
            SkipReason::NotCached => write!(f, "no cached response"),
            SkipReason::NoService => write!(f, "no inference service configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Eligible,
    Skipped(SkipReason),
}

impl Selection {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Selection::Eligible)
    }
}

#[derive(Clone)]
pub struct Selector {
    source_column: String,
    min_source_len: usize,
    filter: EntryFilter,
    predicate: Option<EntryPredicate>,
    tag_column: String,
    protected_tags: Vec<String>,
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("source_column", &self.source_column)
            .field("min_source_len", &self.min_source_len)
            .field("filter", &self.filter)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("tag_column", &self.tag_column)
            .field("protected_tags", &self.protected_tags)
            .finish()
    }
}

impl Selector {
    pub fn new(source_column: impl Into<String>, min_source_len: usize) -> Self {
        Self {
            source_column: source_column.into(),
            min_source_len,
            filter: EntryFilter::default(),
            predicate: None,
            tag_column: String::new(),
            protected_tags: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_predicate(mut self, predicate: EntryPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Entries whose `tag_column` holds one of `tags` are never processed.
    pub fn with_protection(mut self, tag_column: impl Into<String>, tags: Vec<String>) -> Self {
        self.tag_column = tag_column.into();
        self.protected_tags = tags;
        self
    }

    /// The protected tag carried by `entry`, if any.
    pub fn protected_tag<'e>(&self, entry: &'e Entry) -> Option<&'e str> {
        if self.tag_column.is_empty() {
            return None;
        }
        let tag = entry.get(&self.tag_column).trim();
        if !tag.is_empty() && self.protected_tags.iter().any(|p| p == tag) {
            Some(tag)
        } else {
            None
        }
    }

    /// Rules shared by every stage: a key is required and protected entries
    /// are left alone.
    pub fn select_for_merge(&self, entry: &Entry) -> Selection {
        if entry.key().is_empty() {
            return Selection::Skipped(SkipReason::NoKey);
        }
        if let Some(tag) = self.protected_tag(entry) {
            return Selection::Skipped(SkipReason::Protected(tag.to_string()));
        }
        Selection::Eligible
    }

    /// Whether `entry` should be sent to the extractor.
    pub fn select(&self, entry: &Entry) -> Selection {
        let base = self.select_for_merge(entry);
        if !base.is_eligible() {
            return base;
        }
        if !self.filter.matches(entry) {
            return Selection::Skipped(SkipReason::Filtered);
        }
        if let Some(ref predicate) = self.predicate {
            if !predicate(entry) {
                return Selection::Skipped(SkipReason::Filtered);
            }
        }
        let len = entry.get(&self.source_column).trim().chars().count();
        if len < self.min_source_len {
            return Selection::Skipped(SkipReason::SourceTooShort {
                len,
                min: self.min_source_len,
            });
        }
        Selection::Eligible
    }
}
