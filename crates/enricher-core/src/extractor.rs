//! Send an entry's source text to the model and cache the raw response.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::ResponseCache;
use crate::catalog::Entry;
use crate::features::FeatureSet;
use crate::prompt;
use crate::service::{InferenceService, ServiceError};
use crate::FailureReason;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to write cached response: {0}")]
    Cache(#[from] std::io::Error),
}

impl From<ExtractError> for FailureReason {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::Service(e) => FailureReason::Service(e.to_string()),
            ExtractError::Cache(e) => FailureReason::Cache(e.to_string()),
        }
    }
}

pub struct Extractor<'a> {
    service: &'a dyn InferenceService,
    cache: &'a ResponseCache,
    instructions: String,
    source_column: &'static str,
}

impl<'a> Extractor<'a> {
    pub fn new(
        service: &'a dyn InferenceService,
        cache: &'a ResponseCache,
        features: &FeatureSet,
    ) -> Self {
        Self {
            service,
            cache,
            instructions: prompt::build_instructions(features),
            source_column: features.region().source_column(),
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Query the model for `entry` and overwrite its cache file with the
    /// response. No retries.
    pub async fn extract(&self, entry: &Entry) -> Result<PathBuf, ExtractError> {
        let context = prompt::context_tag(entry);
        let content = entry.get(self.source_column);
        tracing::debug!(
            key = %entry.key(),
            service = self.service.name(),
            chars = content.chars().count(),
            "extracting"
        );
        let text = self
            .service
            .infer(&context, content, &self.instructions)
            .await?;
        let path = self.cache.write(entry.key(), &text)?;
        tracing::debug!(key = %entry.key(), path = %path.display(), "cached response");
        Ok(path)
    }
}
