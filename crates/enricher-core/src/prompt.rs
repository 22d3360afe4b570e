//! Instruction prompt generation for a [`FeatureSet`].
//!
//! The output depends only on the feature set, so the same set always yields
//! byte-identical text.

use crate::catalog::Entry;
use crate::features::{FeatureSet, FeatureSpec};

/// Schema line for one feature inside the `Output format` block.
pub fn schema_line(feature: &FeatureSpec) -> String {
    if feature.is_list {
        format!("  \"{}\": [...], // zero or more quotes", feature.key)
    } else {
        format!(
            "  \"{}\": \"...\", // a single quote or empty if not applicable",
            feature.key
        )
    }
}

/// Definition line for one feature inside the `Definitions` block.
pub fn definition_line(feature: &FeatureSpec) -> String {
    format!("- {}: {}", feature.key, feature.description)
}

/// Build the full instruction text for a feature set.
pub fn build_instructions(features: &FeatureSet) -> String {
    let label = features.region().label();
    let schema = features
        .features()
        .iter()
        .map(schema_line)
        .collect::<Vec<_>>()
        .join(",\n");
    let definitions = features
        .features()
        .iter()
        .map(definition_line)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an AI agent designed to extract structured metadata from historical {label}s of early printed editions of Euclid’s Elements.\n\
         \n\
         You will be given:\n\
         - The language of the transcription.\n\
         - The transcribed text of the {label}.\n\
         \n\
         Your task is to extract specific paratextual features from the transcription and return them as a JSON object.\n\
         Each field should contain the exact quoted text(s) from the input, with no modifications, rephrasing, or interpretation. \
         Include the original whitespaces, line breaks and punctuation as they appear in the transcription.\n\
         Some text may apply to more than one field, so you may return the same text portions in multiple fields if applicable.\n\
         \n\
         Return only a valid JSON. Do not include any other output.\n\
         \n\
         Output format:\n\
         {{\n\
         {schema}\n\
         }}\n\
         \n\
         Definitions:\n\
         {definitions}\n"
    )
}

/// Context message sent ahead of the source text: the entry's languages.
pub fn context_tag(entry: &Entry) -> String {
    let languages = entry.languages();
    if languages.is_empty() {
        "Transcription language: unknown".to_string()
    } else {
        format!("Transcription language: {}", languages.join(", "))
    }
}
