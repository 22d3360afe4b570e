//! English translation of title, colophon and imprint text.
//!
//! Entries qualify when they are not already in English and have no English
//! title yet. Results land in the `<column>_EN` columns.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use crate::catalog::{
    COLOPHON_COLUMN, Catalog, Entry, IMPRINT_COLUMN, TITLE_COLUMN, translated_column,
};
use crate::selector::{Selection, Selector, SkipReason};
use crate::service::{InferenceService, ServiceError, TranslationService};
use crate::{EntryOutcome, FailureReason, ProgressEvent};

/// Source columns translated together, in request order.
pub const TRANSLATED_COLUMNS: [&str; 3] = [TITLE_COLUMN, COLOPHON_COLUMN, IMPRINT_COLUMN];

pub const TRANSLATION_REQUEST: &str = "Translate this text to English";

pub const TRANSLATION_INSTRUCTIONS: &str = "Translate the text to English, preserving the original meaning and context. \
Do not add any additional information or context. \
Please preserve the original formatting, whitespace, line breaks (even at the middle of a sentence) and punctuation as much as possible.";

/// Where translations come from.
#[derive(Clone, Copy)]
pub enum Translator<'a> {
    /// A machine translation API, one batched call per entry.
    Machine(&'a dyn TranslationService),
    /// A language model, one call per non-empty field.
    Llm(&'a dyn InferenceService),
}

/// Whether `entry` still needs an English translation.
pub fn needs_translation(entry: &Entry) -> bool {
    !entry.language().trim().eq_ignore_ascii_case("ENGLISH")
        && entry.translated(TITLE_COLUMN).trim().is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationStats {
    pub translated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Source languages reported by the machine translator.
    pub languages: BTreeSet<String>,
}

/// Translate every qualifying entry in place.
///
/// `selector` supplies the key and protection rules; its filter is not
/// applied. Failures are reported per entry and never stop the batch.
pub async fn translate_catalog(
    catalog: &mut Catalog,
    translator: Translator<'_>,
    selector: &Selector,
    progress: impl Fn(ProgressEvent),
    cancel: CancellationToken,
) -> TranslationStats {
    for column in TRANSLATED_COLUMNS {
        catalog.register_column(&translated_column(column));
    }

    let mut stats = TranslationStats::default();
    let total = catalog.len();
    for (index, entry) in catalog.entries_mut().iter_mut().enumerate() {
        if cancel.is_cancelled() {
            progress(ProgressEvent::Cancelled { processed: index });
            break;
        }
        let key = entry.key().to_string();

        let outcome = match selector.select_for_merge(entry) {
            Selection::Skipped(reason) => EntryOutcome::Skipped(reason),
            Selection::Eligible if !needs_translation(entry) => {
                EntryOutcome::Skipped(SkipReason::Filtered)
            }
            Selection::Eligible => {
                progress(ProgressEvent::Processing {
                    index,
                    total,
                    key: key.clone(),
                });
                match translate_entry(entry, translator).await {
                    Ok(languages) => {
                        stats.languages.extend(languages);
                        EntryOutcome::Success {
                            extracted: true,
                            merged_columns: Some(TRANSLATED_COLUMNS.len()),
                        }
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, "translation failed");
                        progress(ProgressEvent::Warning {
                            index,
                            total,
                            key: key.clone(),
                            message: e.to_string(),
                        });
                        EntryOutcome::Failed(FailureReason::Service(e.to_string()))
                    }
                }
            }
        };

        match outcome {
            EntryOutcome::Success { .. } => stats.translated += 1,
            EntryOutcome::Skipped(_) => stats.skipped += 1,
            EntryOutcome::Failed(_) => stats.failed += 1,
        }
        progress(ProgressEvent::Outcome {
            index,
            total,
            key,
            outcome,
        });
    }
    stats
}

/// Translate one entry. Columns are only written once every field succeeded.
async fn translate_entry(
    entry: &mut Entry,
    translator: Translator<'_>,
) -> Result<BTreeSet<String>, ServiceError> {
    let sources: Vec<String> = TRANSLATED_COLUMNS
        .iter()
        .map(|c| entry.get(c).to_string())
        .collect();

    let (texts, languages) = match translator {
        Translator::Machine(service) => {
            let result = service.translate(&sources).await?;
            if result.texts.len() != sources.len() {
                return Err(ServiceError::TranslationCount {
                    expected: sources.len(),
                    got: result.texts.len(),
                });
            }
            (result.texts, result.languages)
        }
        Translator::Llm(service) => {
            let mut texts = Vec::with_capacity(sources.len());
            for source in &sources {
                if source.is_empty() {
                    texts.push(String::new());
                } else {
                    texts.push(
                        service
                            .infer(TRANSLATION_REQUEST, source, TRANSLATION_INSTRUCTIONS)
                            .await?,
                    );
                }
            }
            (texts, BTreeSet::new())
        }
    };

    for (column, text) in TRANSLATED_COLUMNS.iter().zip(texts) {
        entry.set(translated_column(column), text);
    }
    Ok(languages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::mock::{MockInference, MockReply, MockTranslator};

    fn catalog() -> Catalog {
        Catalog::from_reader(
            "key,language,title,colophon,imprint,title_EN,tagged\r\n\
             Paris1574,FRENCH,Les Elemens,,A Paris,,\r\n\
             London1570,ENGLISH,The Elements,,,,\r\n\
             Lyon1600,LATIN,Elementa,,,Elements,\r\n\
             Rome1589,LATIN,Euclidis,,,,manual\r\n"
                .as_bytes(),
        )
        .unwrap()
    }

    fn selector() -> Selector {
        Selector::new("title", 0).with_protection("tagged", vec!["manual".into()])
    }

    #[test]
    fn qualification_rule() {
        let c = catalog();
        assert!(needs_translation(c.get("Paris1574").unwrap()));
        assert!(!needs_translation(c.get("London1570").unwrap()));
        assert!(!needs_translation(c.get("Lyon1600").unwrap()));
    }

    #[tokio::test]
    async fn machine_translation_fills_en_columns() {
        let mut c = catalog();
        let mock = MockTranslator::new("fr");
        let stats = translate_catalog(
            &mut c,
            Translator::Machine(&mock),
            &selector(),
            |_| {},
            CancellationToken::new(),
        )
        .await;

        assert_eq!(mock.call_count(), 1);
        assert_eq!(stats.translated, 1);
        assert_eq!(stats.skipped, 3);
        assert!(stats.languages.contains("fr"));
        let paris = c.get("Paris1574").unwrap();
        assert_eq!(paris.get("title_EN"), "[en] Les Elemens");
        assert_eq!(paris.get("colophon_EN"), "");
        assert_eq!(paris.get("imprint_EN"), "[en] A Paris");
        assert!(c.has_column("colophon_EN"));
        assert!(c.has_column("imprint_EN"));
    }

    #[tokio::test]
    async fn llm_translation_skips_empty_fields() {
        let mut c = catalog();
        let mock = MockInference::new(MockReply::text("The Elements"));
        translate_catalog(
            &mut c,
            Translator::Llm(&mock),
            &selector(),
            |_| {},
            CancellationToken::new(),
        )
        .await;

        // title and imprint of Paris1574; colophon is empty
        assert_eq!(mock.call_count(), 2);
        let req = &mock.requests()[0];
        assert_eq!(req.context, TRANSLATION_REQUEST);
        assert_eq!(req.content, "Les Elemens");
        assert_eq!(req.instructions, TRANSLATION_INSTRUCTIONS);
    }

    #[tokio::test]
    async fn failure_leaves_entry_untouched() {
        let mut c = catalog();
        let mock = MockTranslator::failing();
        let stats = translate_catalog(
            &mut c,
            Translator::Machine(&mock),
            &selector(),
            |_| {},
            CancellationToken::new(),
        )
        .await;
        assert_eq!(stats.failed, 1);
        assert_eq!(c.get("Paris1574").unwrap().get("title_EN"), "");
    }
}
