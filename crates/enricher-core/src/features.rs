//! Declarative feature registry.
//!
//! A [`FeatureSpec`] names one field the model is asked to quote from the
//! source text, the JSON key it must answer under, and the catalog column the
//! answer is merged into. A [`FeatureSet`] groups specs that are extracted in
//! one call and therefore must all read the same [`Region`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{IMPRINT_COLUMN, TITLE_COLUMN};

/// The slice of an entry's text a feature is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    #[default]
    TitlePage,
    Imprint,
}

impl Region {
    /// Catalog column holding the transcription for this region.
    pub fn source_column(self) -> &'static str {
        match self {
            Region::TitlePage => TITLE_COLUMN,
            Region::Imprint => IMPRINT_COLUMN,
        }
    }

    /// Identifier used in config files and cache paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::TitlePage => "title_page",
            Region::Imprint => "imprint",
        }
    }

    /// Human-readable name used in prompts.
    pub fn label(self) -> &'static str {
        match self {
            Region::TitlePage => "title page",
            Region::Imprint => "imprint",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "title_page" | "title" => Ok(Region::TitlePage),
            "imprint" => Ok(Region::Imprint),
            other => Err(format!("unknown region '{}'", other)),
        }
    }
}

/// One extractable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Key the model answers under in its JSON object.
    pub key: String,
    /// Catalog column the normalized answer is written to.
    pub column: String,
    pub description: String,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub region: Region,
}

impl FeatureSpec {
    pub fn new(
        key: impl Into<String>,
        column: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
            description: description.into(),
            is_list: false,
            region: Region::TitlePage,
        }
    }

    /// Mark the feature as list-valued.
    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeatureSetError {
    #[error("feature set is empty")]
    Empty,
    #[error("feature '{key}' reads region {found}, but the set reads {expected}")]
    MixedRegions {
        key: String,
        expected: Region,
        found: Region,
    },
    #[error("duplicate feature key '{0}'")]
    DuplicateKey(String),
}

/// A non-empty batch of features sharing one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    region: Region,
    features: Vec<FeatureSpec>,
}

impl FeatureSet {
    pub fn new(features: Vec<FeatureSpec>) -> Result<Self, FeatureSetError> {
        let region = features.first().ok_or(FeatureSetError::Empty)?.region;
        let mut seen = HashSet::new();
        for f in &features {
            if f.region != region {
                return Err(FeatureSetError::MixedRegions {
                    key: f.key.clone(),
                    expected: region,
                    found: f.region,
                });
            }
            if !seen.insert(f.key.as_str()) {
                return Err(FeatureSetError::DuplicateKey(f.key.clone()));
            }
        }
        Ok(Self { region, features })
    }

    /// The built-in features for `region`.
    pub fn builtin(region: Region) -> Self {
        let features = match region {
            Region::TitlePage => title_page_features(),
            Region::Imprint => imprint_features(),
        };
        Self { region, features }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    /// Look up a feature by its response key.
    pub fn get(&self, key: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.key == key)
    }

    /// Destination columns, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.column.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::builtin(Region::TitlePage)
    }
}

const ADDITIONAL_QUOTE: &str = " (an additional quote if applicable).";

/// Standard title-page features.
pub fn title_page_features() -> Vec<FeatureSpec> {
    let adapter_description = "Any descriptors found alongside the adapter name, such as academic titles, ranks, or affiliations.";
    let euclid_description = "Any descriptors found alongside Euclid’s name, such as mentioning him being a mathematician.";
    let audience = "Explicit mentions of the work's intended recipients or audience.";

    vec![
        FeatureSpec::new(
            "baseContent",
            "BASE CONTENT",
            "The minimal designation of the book’s main content, typically appearing at the beginning of the title page, without elaboration.",
        ),
        FeatureSpec::new(
            "adapterAttribution",
            "AUTHOR NAME",
            "The name of the contemporary adapter (author, editor, translator, commentator, etc.) as it appears on the title page.",
        ),
        FeatureSpec::new("adapterDescription", "AUTHOR DESCRIPTION", adapter_description),
        FeatureSpec::new(
            "adapterDescription2",
            "AUTHOR DESCRIPTION 2",
            format!("{}{}", adapter_description, ADDITIONAL_QUOTE),
        ),
        FeatureSpec::new(
            "patronageDedication",
            "PATRON REF",
            "Mentions of patrons or dedication.",
        ),
        FeatureSpec::new(
            "editionStatement",
            "EDITION INFO",
            "Any information that is highlighted as relevant for this specific edition such as claims regarding the corrections and revisions introduced in it.",
        ),
        FeatureSpec::new(
            "publishingPrivileges",
            "PRIVILEGES",
            "Mentions of royal privileges or legal permissions granted for printing.",
        ),
        FeatureSpec::new(
            "verbs",
            "VERBS",
            "Action verbs such as traduit (translated), commenté (commented), augmenté (expanded) that describe the role the contemporary scholar played in bringing about the work.",
        )
        .list(),
        FeatureSpec::new(
            "explicitLanguageReferences",
            "EXPLICITLY STATED: TRANSLATED FROM",
            "Mentions of the source language (e.g., Latin or Greek) and/or the target language.",
        )
        .list(),
        FeatureSpec::new(
            "otherEducationalAuthorities",
            "OTHER NAMES",
            "Mentions of other scholars, either ancients, such as Theon of Alexandria, or contemporary, like Simon Stevin.",
        )
        .list(),
        FeatureSpec::new(
            "euclidMentions",
            "EUCLID REF",
            "Euclid's name as it appears on the title page.",
        )
        .list(),
        FeatureSpec::new("euclidDescription", "EUCLID DESCRIPTION", euclid_description).list(),
        FeatureSpec::new(
            "euclidDescription2",
            "EUCLID DESCRIPTION 2",
            format!("{}{}", euclid_description, ADDITIONAL_QUOTE),
        )
        .list(),
        FeatureSpec::new("intendedAudience", "EXPLICIT RECIPIENT", audience).list(),
        FeatureSpec::new(
            "intendedAudience2",
            "EXPLICIT RECIPIENT 2",
            format!("{}{}", audience, ADDITIONAL_QUOTE),
        )
        .list(),
        FeatureSpec::new(
            "elementsDesignation",
            "ELEMENTS DESIGNATION",
            "The designation of the Elements, such as 'Elements of Geometry' or 'Euclid’s Elements', as it appears on the title page.",
        ),
        FeatureSpec::new(
            "greekDesignation",
            "GREEK IN NON GREEK BOOKS",
            "Greek designation of the book in non-Greek books.",
        ),
        FeatureSpec::new(
            "institutions",
            "INSTITUTIONS",
            "Mentions of institutions, such as societies or universities, associated with the book.",
        )
        .list(),
    ]
}

/// Standard imprint features.
pub fn imprint_features() -> Vec<FeatureSpec> {
    [
        ("imprintPlace", "IMPRINT PLACE", "The place of publication as it appears in the imprint.", false),
        ("imprintPublisher", "IMPRINT PUBLISHER", "The name of the printer or publisher, including any address or sign of the shop.", false),
        ("imprintDate", "IMPRINT DATE", "The date of publication as it appears in the imprint.", false),
        ("imprintPrivileges", "IMPRINT PRIVILEGES", "Mentions of royal privileges or legal permissions granted for printing.", false),
        ("imprintDedication", "IMPRINT DEDICATION", "Mentions of patrons or dedication.", false),
        ("imprintAdapterAttribution", "IMPRINT AUTHOR NAME", "The name of the contemporary adapter (author, editor, translator, commentator, etc.) as it appears in the imprint.", false),
        ("imprintAdapterDescription", "IMPRINT AUTHOR DESCRIPTION", "Any descriptors found alongside the adapter name, such as academic titles, ranks, or affiliations.", true),
    ]
    .into_iter()
    .map(|(key, column, description, is_list)| FeatureSpec {
        key: key.to_string(),
        column: column.to_string(),
        description: description.to_string(),
        is_list,
        region: Region::Imprint,
    })
    .collect()
}
