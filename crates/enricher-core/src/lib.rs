use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod cache;
pub mod catalog;
pub mod config_file;
pub mod extractor;
pub mod features;
pub mod fetch;
pub mod merger;
pub mod pipeline;
pub mod prompt;
pub mod selector;
pub mod service;
pub mod transcribe;
pub mod translate;
pub mod verifier;

// Re-export for convenience
pub use cache::ResponseCache;
pub use catalog::{Catalog, CatalogError, Entry};
pub use features::{FeatureSet, FeatureSetError, FeatureSpec, Region};
pub use selector::{EntryFilter, EntryPredicate, Selection, Selector, SkipReason};
pub use service::{InferenceService, ServiceError, TranslationService};
pub use verifier::{Mismatch, Verifier};

/// Default column recording which run last merged an entry.
pub const DEFAULT_TAG_COLUMN: &str = "enriched_by";

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("invalid feature set: {0}")]
    Features(#[from] FeatureSetError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Which pipeline stages a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Call the model and cache responses; leave the catalog untouched.
    Extract,
    /// Merge previously cached responses only.
    Merge,
    #[default]
    Both,
}

impl RunMode {
    pub fn extracts(self) -> bool {
        matches!(self, RunMode::Extract | RunMode::Both)
    }

    pub fn merges(self) -> bool {
        matches!(self, RunMode::Merge | RunMode::Both)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Extract => "extract",
            RunMode::Merge => "merge",
            RunMode::Both => "both",
        })
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extract" => Ok(RunMode::Extract),
            "merge" => Ok(RunMode::Merge),
            "both" | "extract-and-merge" => Ok(RunMode::Both),
            other => Err(format!("unknown run mode '{}'", other)),
        }
    }
}

/// Why an entry failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The inference or translation call failed.
    Service(String),
    /// The cache file could not be read or written.
    Cache(String),
    /// The cached response could not be parsed.
    Parse(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Service(m) => write!(f, "service error: {}", m),
            FailureReason::Cache(m) => write!(f, "cache error: {}", m),
            FailureReason::Parse(m) => write!(f, "malformed response: {}", m),
        }
    }
}

/// Per-entry result of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Success {
        /// A fresh response was fetched and cached in this run.
        extracted: bool,
        /// Columns written by the merge stage, or `None` if it did not run.
        merged_columns: Option<usize>,
    },
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl EntryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EntryOutcome::Failed(_))
    }
}

/// Progress events emitted during a batch.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        total: usize,
        mode: RunMode,
        region: Region,
    },
    CacheCleared {
        removed: usize,
    },
    Processing {
        index: usize,
        total: usize,
        key: String,
    },
    Outcome {
        index: usize,
        total: usize,
        key: String,
        outcome: EntryOutcome,
    },
    Warning {
        index: usize,
        total: usize,
        key: String,
        message: String,
    },
    Cancelled {
        processed: usize,
    },
}

/// Summary counts for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub extracted: usize,
    pub merged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn record(&mut self, outcome: &EntryOutcome) {
        self.total += 1;
        match outcome {
            EntryOutcome::Success {
                extracted,
                merged_columns,
            } => {
                if *extracted {
                    self.extracted += 1;
                }
                if merged_columns.is_some() {
                    self.merged += 1;
                }
            }
            EntryOutcome::Skipped(_) => self.skipped += 1,
            EntryOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Everything a batch produced, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, EntryOutcome)>,
    pub stats: BatchStats,
    /// The batch stopped early on cancellation.
    pub cancelled: bool,
}

/// Configuration for an enrichment batch.
#[derive(Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub google_access_token: Option<String>,
    pub google_project_id: Option<String>,
    pub mode: RunMode,
    pub features: FeatureSet,
    pub filter: EntryFilter,
    /// Extra selection rule for library callers; not loadable from TOML.
    pub predicate: Option<EntryPredicate>,
    /// Minimum trimmed character count of the source text for extraction.
    pub min_source_len: usize,
    /// Responses live in `<cache_root>/<region>/`.
    pub cache_root: PathBuf,
    /// Clear the region's cache directory before extracting.
    pub reset_cache: bool,
    /// Value written to `tag_column` on merge. Defaults to the service name.
    pub run_tag: Option<String>,
    pub tag_column: String,
    /// Entries tagged with any of these are never extracted or merged.
    pub protected_tags: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("openai_base_url", &self.openai_base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "google_access_token",
                &self.google_access_token.as_ref().map(|_| "***"),
            )
            .field("google_project_id", &self.google_project_id)
            .field("mode", &self.mode)
            .field("region", &self.features.region())
            .field("features", &self.features.len())
            .field("filter", &self.filter)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("min_source_len", &self.min_source_len)
            .field("cache_root", &self.cache_root)
            .field("reset_cache", &self.reset_cache)
            .field("run_tag", &self.run_tag)
            .field("tag_column", &self.tag_column)
            .field("protected_tags", &self.protected_tags)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: service::openai::DEFAULT_BASE_URL.to_string(),
            model: service::openai::DEFAULT_MODEL.to_string(),
            max_tokens: None,
            request_timeout_secs: 120,
            google_access_token: None,
            google_project_id: None,
            mode: RunMode::default(),
            features: FeatureSet::default(),
            filter: EntryFilter::default(),
            predicate: None,
            min_source_len: 10,
            cache_root: PathBuf::from("out"),
            reset_cache: false,
            run_tag: None,
            tag_column: DEFAULT_TAG_COLUMN.to_string(),
            protected_tags: vec!["manual".to_string()],
        }
    }
}

impl Config {
    /// Cache directory for the configured region.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_root.join(self.features.region().as_str())
    }

    /// Selector built from the filter, predicate and protection settings.
    pub fn selector(&self) -> Selector {
        let mut selector = Selector::new(
            self.features.region().source_column(),
            self.min_source_len,
        )
        .with_filter(self.filter.clone())
        .with_protection(self.tag_column.clone(), self.protected_tags.clone());
        if let Some(ref predicate) = self.predicate {
            selector = selector.with_predicate(predicate.clone());
        }
        selector
    }

    /// Switch to the built-in features of `region`. Fails if a custom
    /// feature set for another region is configured.
    pub fn set_region(&mut self, region: Region) -> Result<(), CoreError> {
        let current = self.features.region();
        if current == region {
            return Ok(());
        }
        if self.features != FeatureSet::builtin(current) {
            return Err(CoreError::Config(format!(
                "configured features read region {}, not {}",
                current, region
            )));
        }
        self.features = FeatureSet::builtin(region);
        Ok(())
    }

    /// The tag written on merge: `run_tag`, else the service name, else the model.
    pub fn effective_run_tag(&self, service: Option<&dyn InferenceService>) -> String {
        self.run_tag
            .clone()
            .or_else(|| service.map(|s| s.name().to_string()))
            .unwrap_or_else(|| self.model.clone())
    }
}

/// Run the enrichment pipeline over a catalog.
///
/// Entries are processed in order; a failing entry never aborts the batch.
/// The catalog is mutated in place and is not written back; callers persist
/// it once the batch returns.
pub async fn run_batch(
    catalog: &mut Catalog,
    config: &Config,
    service: Option<&dyn InferenceService>,
    progress: impl Fn(ProgressEvent),
    cancel: CancellationToken,
) -> Result<BatchReport, CoreError> {
    pipeline::run_batch(catalog, config, service, progress, cancel).await
}
