//! Sequential extract/merge batch over a catalog.

use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::catalog::{Catalog, Entry};
use crate::extractor::Extractor;
use crate::merger;
use crate::selector::{Selection, Selector, SkipReason};
use crate::service::InferenceService;
use crate::{BatchReport, Config, CoreError, EntryOutcome, FailureReason, ProgressEvent};

/// Run the configured stages over every entry of `catalog`, in order.
///
/// Batch-level problems (missing source column, unclearable cache) are
/// returned as errors before any entry is touched. Per-entry problems become
/// [`EntryOutcome::Failed`] and the batch moves on.
pub async fn run_batch(
    catalog: &mut Catalog,
    config: &Config,
    service: Option<&dyn InferenceService>,
    progress: impl Fn(ProgressEvent),
    cancel: CancellationToken,
) -> Result<BatchReport, CoreError> {
    let region = config.features.region();
    if config.mode.extracts() {
        catalog.require_column(region.source_column())?;
    }

    let cache = ResponseCache::new(config.cache_dir());
    if config.reset_cache && config.mode.extracts() {
        let removed = cache.clear()?;
        progress(ProgressEvent::CacheCleared { removed });
    }

    if config.mode.merges() {
        for column in config.features.columns() {
            catalog.register_column(column);
        }
        if !config.tag_column.is_empty() {
            catalog.register_column(&config.tag_column);
        }
    }

    let selector = config.selector();
    let extractor = service.map(|s| Extractor::new(s, &cache, &config.features));
    let run_tag = config.effective_run_tag(service);
    let stage = Stage {
        config,
        selector: &selector,
        extractor: extractor.as_ref(),
        cache: &cache,
        run_tag: &run_tag,
    };

    let total = catalog.len();
    tracing::info!(total, mode = %config.mode, region = %region, "starting batch");
    progress(ProgressEvent::Started {
        total,
        mode: config.mode,
        region,
    });

    let mut report = BatchReport::default();
    for (index, entry) in catalog.entries_mut().iter_mut().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(processed = index, "batch cancelled");
            progress(ProgressEvent::Cancelled { processed: index });
            report.cancelled = true;
            break;
        }

        let key = entry.key().to_string();
        progress(ProgressEvent::Processing {
            index,
            total,
            key: key.clone(),
        });

        let outcome = stage.process(entry).await;
        if let EntryOutcome::Failed(ref reason) = outcome {
            tracing::debug!(key = %key, error = %reason, "entry failed");
            progress(ProgressEvent::Warning {
                index,
                total,
                key: key.clone(),
                message: reason.to_string(),
            });
        }

        report.stats.record(&outcome);
        progress(ProgressEvent::Outcome {
            index,
            total,
            key: key.clone(),
            outcome: outcome.clone(),
        });
        report.outcomes.push((key, outcome));
    }

    tracing::info!(
        extracted = report.stats.extracted,
        merged = report.stats.merged,
        skipped = report.stats.skipped,
        failed = report.stats.failed,
        "batch finished"
    );
    Ok(report)
}

struct Stage<'a> {
    config: &'a Config,
    selector: &'a Selector,
    extractor: Option<&'a Extractor<'a>>,
    cache: &'a ResponseCache,
    run_tag: &'a str,
}

impl Stage<'_> {
    async fn process(&self, entry: &mut Entry) -> EntryOutcome {
        if let Selection::Skipped(reason) = self.selector.select_for_merge(entry) {
            return EntryOutcome::Skipped(reason);
        }

        let mut extracted = false;
        let mut skip_reason = None;
        if self.config.mode.extracts() {
            match self.selector.select(entry) {
                Selection::Eligible => match self.extractor {
                    Some(extractor) => match extractor.extract(entry).await {
                        Ok(_) => extracted = true,
                        Err(e) => return EntryOutcome::Failed(e.into()),
                    },
                    None => skip_reason = Some(SkipReason::NoService),
                },
                Selection::Skipped(reason) => {
                    tracing::debug!(key = %entry.key(), reason = %reason, "not extracting");
                    return EntryOutcome::Skipped(reason);
                }
            }
        }

        if !self.config.mode.merges() {
            return match skip_reason {
                Some(reason) => EntryOutcome::Skipped(reason),
                None => EntryOutcome::Success {
                    extracted,
                    merged_columns: None,
                },
            };
        }

        // An entry selected this run but not sent still merges a response
        // cached by an earlier run.
        let text = match self.cache.read(entry.key()) {
            Ok(Some(text)) => text,
            Ok(None) => {
                return EntryOutcome::Skipped(skip_reason.unwrap_or(SkipReason::NotCached));
            }
            Err(e) => return EntryOutcome::Failed(FailureReason::Cache(e.to_string())),
        };

        let tag = if self.config.tag_column.is_empty() {
            None
        } else {
            Some((self.config.tag_column.as_str(), self.run_tag))
        };
        match merger::merge_entry(entry, &text, &self.config.features, tag) {
            Ok(columns) => EntryOutcome::Success {
                extracted,
                merged_columns: Some(columns),
            },
            Err(e) => EntryOutcome::Failed(FailureReason::Parse(e.to_string())),
        }
    }
}
