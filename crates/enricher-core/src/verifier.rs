//! Cross-check extracted column values against the transcribed title.
//!
//! Extracted values are meant to be exact quotes, so every value should be
//! found in the title once whitespace, hyphenation and case are ignored.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::{Catalog, Entry, TITLE_COLUMN};
use crate::features::FeatureSet;

/// Whitespace plus ASCII, soft and Unicode hyphens.
static IGNORED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-\x{00AD}\x{2010}\x{2011}]+").unwrap());

/// Multi-valued columns that predate the feature registry.
pub const LEGACY_SPLIT_COLUMNS: &[&str] = &[
    "EUCLID MENTIONED IN TITLE PAGE",
    "TITLE: VERBS",
    "OTHER NAMES",
    "EXPLICITLY STATED: TRANSLATED FROM",
    "EXPLICITLY STATED: TRANSLATED TO",
];

/// Remove whitespace and hyphens, then lowercase.
pub fn normalize(text: &str) -> String {
    IGNORED_RE.replace_all(text, "").to_lowercase()
}

/// True for fully upper-case column names: at least one cased letter and no
/// lower-case letters (`"AUTHOR NAME"`, `"TITLE: VERBS"`).
pub fn is_extracted_column(name: &str) -> bool {
    name.chars().any(|c| c.is_uppercase()) && !name.chars().any(|c| c.is_lowercase())
}

/// A value that could not be located in its entry's title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub key: String,
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Verifier {
    source_column: String,
    split_columns: HashSet<String>,
}

impl Default for Verifier {
    fn default() -> Self {
        let mut split_columns: HashSet<String> =
            LEGACY_SPLIT_COLUMNS.iter().map(|c| c.to_string()).collect();
        for set in [
            FeatureSet::builtin(crate::features::Region::TitlePage),
            FeatureSet::builtin(crate::features::Region::Imprint),
        ] {
            split_columns.extend(
                set.features()
                    .iter()
                    .filter(|f| f.is_list)
                    .map(|f| f.column.clone()),
            );
        }
        Self {
            source_column: TITLE_COLUMN.to_string(),
            split_columns,
        }
    }
}

impl Verifier {
    pub fn new(source_column: impl Into<String>, split_columns: HashSet<String>) -> Self {
        Self {
            source_column: source_column.into(),
            split_columns,
        }
    }

    /// Add more columns whose values are split on `", "` before checking.
    pub fn with_split_columns<I: IntoIterator<Item = String>>(mut self, columns: I) -> Self {
        self.split_columns.extend(columns);
        self
    }

    pub fn is_split_column(&self, column: &str) -> bool {
        self.split_columns.contains(column)
    }

    /// Check one entry. Entries without a key or source text yield nothing.
    pub fn verify_entry(&self, entry: &Entry, columns: &[String]) -> Vec<Mismatch> {
        let key = entry.key();
        let source = entry.get(&self.source_column).trim();
        if key.is_empty() || source.is_empty() {
            return Vec::new();
        }
        let haystack = normalize(source);

        let mut mismatches = Vec::new();
        for column in columns.iter().filter(|c| is_extracted_column(c)) {
            let value = entry.get(column).trim();
            if value.is_empty() {
                continue;
            }
            let parts: Vec<&str> = if self.is_split_column(column) {
                value.split(", ").collect()
            } else {
                vec![value]
            };
            for part in parts {
                let needle = normalize(part);
                if needle.is_empty() || haystack.contains(&needle) {
                    continue;
                }
                mismatches.push(Mismatch {
                    key: key.to_string(),
                    column: column.clone(),
                    value: part.to_string(),
                });
            }
        }
        mismatches
    }

    /// Check every entry in the catalog, in document order.
    pub fn verify_catalog(&self, catalog: &Catalog) -> Vec<Mismatch> {
        let mismatches: Vec<Mismatch> = catalog
            .entries()
            .iter()
            .flat_map(|e| self.verify_entry(e, catalog.fieldnames()))
            .collect();
        tracing::info!(
            entries = catalog.len(),
            mismatches = mismatches.len(),
            "verified catalog"
        );
        mismatches
    }
}
