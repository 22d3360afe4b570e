//! CSV-backed catalog of title-page entries.
//!
//! The catalog is read fully into memory, mutated in place, and written back
//! with the same ordered fieldnames. Columns created while merging must be
//! registered with [`Catalog::register_column`] or they are dropped on write.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

pub const KEY_COLUMN: &str = "key";
pub const TITLE_COLUMN: &str = "title";
pub const IMPRINT_COLUMN: &str = "imprint";
pub const COLOPHON_COLUMN: &str = "colophon";
pub const LANGUAGE_COLUMN: &str = "language";
pub const SECOND_LANGUAGE_COLUMN: &str = "language 2";
pub const SCAN_URL_COLUMN: &str = "scan_url";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("catalog is missing required column '{0}'")]
    MissingColumn(String),
    #[error("duplicate entry key '{0}'")]
    DuplicateKey(String),
}

/// One catalog row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    values: HashMap<String, String>,
}

impl Entry {
    pub fn new(key: impl Into<String>) -> Self {
        let mut entry = Self::default();
        entry.set(KEY_COLUMN, key);
        entry
    }

    /// Build an entry from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn key(&self) -> &str {
        self.get(KEY_COLUMN)
    }

    /// Value of `column`, or `""` when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }

    /// True when the column is absent or holds only whitespace.
    pub fn is_blank(&self, column: &str) -> bool {
        self.get(column).trim().is_empty()
    }

    pub fn title(&self) -> &str {
        self.get(TITLE_COLUMN)
    }

    pub fn imprint(&self) -> &str {
        self.get(IMPRINT_COLUMN)
    }

    pub fn colophon(&self) -> &str {
        self.get(COLOPHON_COLUMN)
    }

    pub fn language(&self) -> &str {
        self.get(LANGUAGE_COLUMN)
    }

    pub fn scan_url(&self) -> &str {
        self.get(SCAN_URL_COLUMN)
    }

    /// English translation column for a source column, e.g. `title` -> `title_EN`.
    pub fn translated(&self, column: &str) -> &str {
        self.get(&translated_column(column))
    }

    /// The non-empty values of `language` and `language 2`, in that order.
    pub fn languages(&self) -> Vec<&str> {
        [LANGUAGE_COLUMN, SECOND_LANGUAGE_COLUMN]
            .iter()
            .map(|c| self.get(c).trim())
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Iterate over `(column, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Name of the English translation column for `column`.
pub fn translated_column(column: &str) -> String {
    format!("{}_EN", column)
}

/// An ordered set of entries plus the ordered fieldnames used on write.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    fieldnames: Vec<String>,
    entries: Vec<Entry>,
}

impl Catalog {
    /// Build a catalog from parts. `key` is registered if absent.
    pub fn from_parts(fieldnames: Vec<String>, entries: Vec<Entry>) -> Self {
        let mut catalog = Self {
            fieldnames,
            entries,
        };
        catalog.register_column(KEY_COLUMN);
        catalog
    }

    /// Read a catalog from a CSV file.
    pub fn read(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)?;
        let catalog = Self::from_reader(file)?;
        tracing::debug!(
            path = %path.display(),
            entries = catalog.len(),
            columns = catalog.fieldnames.len(),
            "loaded catalog"
        );
        Ok(catalog)
    }

    /// Read a catalog from any CSV source.
    ///
    /// Short rows are padded with empty values; cells beyond the header are
    /// ignored. Non-empty keys must be unique.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);

        let mut fieldnames: Vec<String> = rdr
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .collect();
        if let Some(first) = fieldnames.first_mut() {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                *first = stripped.to_string();
            }
        }
        if !fieldnames.iter().any(|f| f == KEY_COLUMN) {
            return Err(CatalogError::MissingColumn(KEY_COLUMN.to_string()));
        }

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut record = csv::ByteRecord::new();
        while rdr.read_byte_record(&mut record)? {
            let entry = Entry::from_pairs(fieldnames.iter().enumerate().map(|(i, name)| {
                let value = record
                    .get(i)
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default();
                (name.clone(), value)
            }));
            let key = entry.key();
            if !key.is_empty() && !seen.insert(key.to_string()) {
                return Err(CatalogError::DuplicateKey(key.to_string()));
            }
            entries.push(entry);
        }

        Ok(Self {
            fieldnames,
            entries,
        })
    }

    /// Write the catalog to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), CatalogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)?;
        tracing::debug!(path = %path.display(), entries = self.len(), "wrote catalog");
        Ok(())
    }

    /// Write the catalog as CSV. Values of unregistered columns are dropped.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), CatalogError> {
        let mut wtr = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(writer);
        wtr.write_record(&self.fieldnames)?;
        for entry in &self.entries {
            wtr.write_record(self.fieldnames.iter().map(|f| entry.get(f)))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Append `column` to the fieldnames if it is not already present.
    /// Returns true when the column was added.
    pub fn register_column(&mut self, column: &str) -> bool {
        if self.has_column(column) {
            return false;
        }
        self.fieldnames.push(column.to_string());
        true
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fieldnames.iter().any(|f| f == column)
    }

    /// Fail with [`CatalogError::MissingColumn`] if `column` is not in the header.
    pub fn require_column(&self, column: &str) -> Result<(), CatalogError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(CatalogError::MissingColumn(column.to_string()))
        }
    }

    pub fn fieldnames(&self) -> &[String] {
        &self.fieldnames
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key() == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
