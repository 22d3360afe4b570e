//! Integration tests for [`run_batch`].
//!
//! Every test uses a [`MockInference`] and a scratch cache directory, so no
//! HTTP requests are made.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use enricher_core::catalog::CatalogError;
use enricher_core::service::mock::{MockInference, MockReply};
use enricher_core::{
    Catalog, Config, CoreError, EntryOutcome, FailureReason, ProgressEvent, ResponseCache,
    RunMode, SkipReason, run_batch,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PARIS_TITLE: &str = "Les Six Premiers Livres des Elements Euclide";
const FENCED_ERRARD: &str = "```json\n{\"adapterAttribution\": \"\\\"Jean Errard\\\"\"}\n```";

fn config_in(tmp: &TempDir, mode: RunMode) -> Config {
    Config {
        mode,
        cache_root: tmp.path().join("out"),
        ..Config::default()
    }
}

fn catalog(csv: &str) -> Catalog {
    Catalog::from_reader(csv.as_bytes()).unwrap()
}

fn paris_catalog() -> Catalog {
    catalog(&format!(
        "key,title,language,AUTHOR NAME,enriched_by\r\nParis1574,{PARIS_TITLE},FRENCH,,\r\n"
    ))
}

/// Collects progress events for later inspection.
#[derive(Default)]
struct Events(Mutex<Vec<ProgressEvent>>);

impl Events {
    fn push(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event);
    }

    fn warnings(&self) -> Vec<(String, String)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Warning { key, message, .. } => {
                    Some((key.clone(), message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn cleared(&self) -> Option<usize> {
        self.0.lock().unwrap().iter().find_map(|e| match e {
            ProgressEvent::CacheCleared { removed } => Some(*removed),
            _ => None,
        })
    }
}

/// Log output captured by a test subscriber.
#[derive(Clone, Default)]
struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl SharedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn paris_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text(FENCED_ERRARD));
    let mut cat = paris_catalog();

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 1);
    assert_eq!(report.stats.extracted, 1);
    assert_eq!(report.stats.merged, 1);
    assert!(!report.stats.has_failures());

    let entry = cat.get("Paris1574").unwrap();
    assert_eq!(entry.get("AUTHOR NAME"), "Jean Errard");
    assert_eq!(entry.title(), PARIS_TITLE);
    assert_eq!(entry.language(), "FRENCH");
    assert_eq!(entry.get("enriched_by"), "mock");
    assert_eq!(entry.get("BASE CONTENT"), "");

    let cached = ResponseCache::new(config.cache_dir())
        .read("Paris1574")
        .unwrap()
        .unwrap();
    assert_eq!(cached, FENCED_ERRARD);
}

#[tokio::test]
async fn catalog_round_trips_untouched_fields() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text(FENCED_ERRARD));
    let mut cat = catalog(&format!(
        "key,title,language,notes\r\nParis1574,{PARIS_TITLE},FRENCH,\"quoted, with comma\"\r\n"
    ));

    run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    let path = tmp.path().join("catalog.csv");
    cat.write(&path).unwrap();
    let reread = Catalog::read(&path).unwrap();
    let entry = reread.get("Paris1574").unwrap();
    assert_eq!(entry.get("notes"), "quoted, with comma");
    assert_eq!(entry.title(), PARIS_TITLE);
    assert_eq!(entry.get("AUTHOR NAME"), "Jean Errard");
    assert_eq!(&reread.fieldnames()[..4], ["key", "title", "language", "notes"]);
}

#[tokio::test]
async fn short_source_is_never_sent() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text("{}"));
    let mut cat = catalog("key,title\r\nShort,EUCLID\r\nBlank,   \r\n");

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 0);
    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Skipped(SkipReason::SourceTooShort { len: 6, min: 10 })
    );
    assert_eq!(report.stats.skipped, 2);
}

#[tokio::test]
async fn malformed_response_leaves_columns_and_warns_once() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text("```json\n{\"adapterAttribution\": \n```"));
    let mut cat = catalog(&format!(
        "key,title,AUTHOR NAME\r\nParis1574,{PARIS_TITLE},Errard\r\n"
    ));
    let events = Events::default();
    let log = SharedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let report = run_batch(
        &mut cat,
        &config,
        Some(&mock),
        |e| events.push(e),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(matches!(
        report.outcomes[0].1,
        EntryOutcome::Failed(FailureReason::Parse(_))
    ));
    assert!(report.stats.has_failures());
    let entry = cat.get("Paris1574").unwrap();
    assert_eq!(entry.get("AUTHOR NAME"), "Errard");
    assert_eq!(entry.get("enriched_by"), "");

    let warnings = events.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, "Paris1574");

    // The progress event is the only user-facing diagnostic.
    let logged = log.contents();
    assert!(logged.contains("entry failed"));
    assert!(!logged.contains("WARN"), "unexpected warning in log: {logged}");
}

#[tokio::test]
async fn service_failure_does_not_stop_batch() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::with_sequence(
        vec![MockReply::Error("overloaded".into())],
        MockReply::text(r#"{"adapterAttribution": "Jean Errard"}"#),
    );
    let mut cat = catalog(&format!(
        "key,title\r\nFirst,{PARIS_TITLE}\r\nSecond,{PARIS_TITLE}\r\n"
    ));

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 2);
    assert!(matches!(
        report.outcomes[0].1,
        EntryOutcome::Failed(FailureReason::Service(_))
    ));
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.merged, 1);
    assert_eq!(cat.get("First").unwrap().get("AUTHOR NAME"), "");
    assert_eq!(cat.get("Second").unwrap().get("AUTHOR NAME"), "Jean Errard");
}

#[tokio::test]
async fn merge_only_reads_existing_cache() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Merge);
    let cache = ResponseCache::new(config.cache_dir());
    cache
        .write("Paris1574", r#"{"verbs": ["traduits", "augmentez"], "unknownKey": "x"}"#)
        .unwrap();
    let mut cat = catalog(&format!(
        "key,title\r\nParis1574,{PARIS_TITLE}\r\nLyon1600,Elementa\r\n"
    ));

    let report = run_batch(&mut cat, &config, None, |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Success {
            extracted: false,
            merged_columns: Some(1)
        }
    );
    assert_eq!(
        report.outcomes[1].1,
        EntryOutcome::Skipped(SkipReason::NotCached)
    );
    let paris = cat.get("Paris1574").unwrap();
    assert_eq!(paris.get("VERBS"), "traduits, augmentez");
    assert!(!cat.has_column("unknownKey"));
    // No service: the tag falls back to the model name.
    assert_eq!(paris.get("enriched_by"), config.model);
}

#[tokio::test]
async fn merging_twice_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Merge);
    ResponseCache::new(config.cache_dir())
        .write("Paris1574", r#"{"verbs": ["a", "", "b"], "euclidMentions": []}"#)
        .unwrap();
    let mut cat = paris_catalog();

    for _ in 0..2 {
        run_batch(&mut cat, &config, None, |_| {}, CancellationToken::new())
            .await
            .unwrap();
    }
    let entry = cat.get("Paris1574").unwrap();
    assert_eq!(entry.get("VERBS"), "a, b");
    assert_eq!(entry.get("EUCLID REF"), "");
}

#[tokio::test]
async fn reset_cache_removes_stale_responses() {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        reset_cache: true,
        ..config_in(&tmp, RunMode::Both)
    };
    let cache = ResponseCache::new(config.cache_dir());
    cache.write("Stale", "{}").unwrap();
    let mock = MockInference::new(MockReply::text("{}"));
    let mut cat = paris_catalog();
    let events = Events::default();

    run_batch(
        &mut cat,
        &config,
        Some(&mock),
        |e| events.push(e),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(events.cleared(), Some(1));
    assert!(!cache.contains("Stale"));
    assert!(cache.contains("Paris1574"));
}

#[tokio::test]
async fn reset_cache_is_ignored_when_only_merging() {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        reset_cache: true,
        ..config_in(&tmp, RunMode::Merge)
    };
    let cache = ResponseCache::new(config.cache_dir());
    cache.write("Paris1574", FENCED_ERRARD).unwrap();
    let mut cat = paris_catalog();

    run_batch(&mut cat, &config, None, |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert!(cache.contains("Paris1574"));
    assert_eq!(cat.get("Paris1574").unwrap().get("AUTHOR NAME"), "Jean Errard");
}

#[tokio::test]
async fn protected_entries_are_neither_extracted_nor_merged() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    ResponseCache::new(config.cache_dir())
        .write("Paris1574", FENCED_ERRARD)
        .unwrap();
    let mock = MockInference::new(MockReply::text(FENCED_ERRARD));
    let mut cat = catalog(&format!(
        "key,title,AUTHOR NAME,enriched_by\r\nParis1574,{PARIS_TITLE},Errard (hand),manual\r\n"
    ));

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 0);
    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Skipped(SkipReason::Protected("manual".into()))
    );
    let entry = cat.get("Paris1574").unwrap();
    assert_eq!(entry.get("AUTHOR NAME"), "Errard (hand)");
    assert_eq!(entry.get("enriched_by"), "manual");
}

#[tokio::test]
async fn extract_only_leaves_catalog_unchanged() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Extract);
    let mock = MockInference::new(MockReply::text(FENCED_ERRARD));
    let mut cat = catalog(&format!("key,title\r\nParis1574,{PARIS_TITLE}\r\n"));

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Success {
            extracted: true,
            merged_columns: None
        }
    );
    assert_eq!(cat.fieldnames(), ["key", "title"]);
    assert!(ResponseCache::new(config.cache_dir()).contains("Paris1574"));
}

#[tokio::test]
async fn missing_service_skips_extraction() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mut cat = paris_catalog();

    let report = run_batch(&mut cat, &config, None, |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Skipped(SkipReason::NoService)
    );
    assert!(!report.stats.has_failures());
}

#[tokio::test]
async fn filter_limits_extraction_to_listed_keys() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp, RunMode::Both);
    config.filter.keys = Some(vec!["Second".into()]);
    let mock = MockInference::new(MockReply::text("{}"));
    let mut cat = catalog(&format!(
        "key,title\r\nFirst,{PARIS_TITLE}\r\nSecond,{PARIS_TITLE}\r\n"
    ));

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 1);
    assert_eq!(mock.requests()[0].content, PARIS_TITLE);
    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Skipped(SkipReason::Filtered)
    );
}

#[tokio::test]
async fn cancelled_batch_stops_before_first_entry() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text("{}"));
    let mut cat = paris_catalog();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_request_keeps_the_finished_entry() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text(FENCED_ERRARD))
        .with_delay(Duration::from_secs(5));
    let mut cat = catalog(&format!(
        "key,title,AUTHOR NAME\r\n\
         Paris1574,{PARIS_TITLE},\r\n\
         Lyon1600,Les quinze livres des elements geometriques,\r\n"
    ));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(mock.call_count(), 1);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(cat.get("Paris1574").unwrap().get("AUTHOR NAME"), "Jean Errard");
    assert_eq!(cat.get("Lyon1600").unwrap().get("AUTHOR NAME"), "");
}

#[tokio::test]
async fn missing_source_column_fails_batch() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp, RunMode::Both);
    let mock = MockInference::new(MockReply::text("{}"));
    let mut cat = catalog("key,imprint\r\nA,A PARIS\r\n");

    let err = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Catalog(CatalogError::MissingColumn(ref c)) if c == "title"
    ));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn rejected_entries_keep_hand_edits_despite_stale_cache() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp, RunMode::Both);
    config.filter.require_empty = vec!["AUTHOR NAME".into()];
    let cache = ResponseCache::new(config.cache_dir());
    cache
        .write("Paris1574", r#"{"adapterAttribution":"Jean Errard"}"#)
        .unwrap();
    cache.write("Short", r#"{"adapterAttribution":"Stale"}"#).unwrap();

    let mock = MockInference::new(MockReply::text(FENCED_ERRARD));
    let mut cat = catalog(&format!(
        "key,title,AUTHOR NAME,enriched_by\r\n\
         Paris1574,{PARIS_TITLE},J. Errard (hand fixed),\r\n\
         Short,abc,,\r\n"
    ));

    let report = run_batch(&mut cat, &config, Some(&mock), |_| {}, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 0);
    assert_eq!(
        report.outcomes[0].1,
        EntryOutcome::Skipped(SkipReason::Filtered)
    );
    assert!(matches!(
        report.outcomes[1].1,
        EntryOutcome::Skipped(SkipReason::SourceTooShort { .. })
    ));
    assert_eq!(report.stats.merged, 0);

    let paris = cat.get("Paris1574").unwrap();
    assert_eq!(paris.get("AUTHOR NAME"), "J. Errard (hand fixed)");
    assert_eq!(paris.get("enriched_by"), "");
    let short = cat.get("Short").unwrap();
    assert_eq!(short.get("AUTHOR NAME"), "");
    assert_eq!(short.get("enriched_by"), "");
}
