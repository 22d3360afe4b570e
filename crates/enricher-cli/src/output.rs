use std::collections::BTreeMap;
use std::io::Write;

use enricher_core::fetch::{FetchOutcome, FetchStats, FetchStatus, FetchTask};
use enricher_core::translate::TranslationStats;
use enricher_core::{BatchReport, EntryOutcome, Mismatch, ProgressEvent, Selection};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the progress events worth a line of their own. Per-entry progress
/// is shown by the progress bar instead.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::CacheCleared { removed } => {
            let msg = format!("Cleared {} cached responses", removed);
            if color.enabled() {
                writeln!(w, "{}", msg.dimmed())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        ProgressEvent::Warning {
            index,
            total,
            key,
            message,
        } => {
            if color.enabled() {
                writeln!(
                    w,
                    "[{}/{}] {} {}: {}",
                    index + 1,
                    total,
                    "WARNING:".yellow(),
                    key.bold(),
                    message
                )?;
            } else {
                writeln!(w, "[{}/{}] WARNING: {}: {}", index + 1, total, key, message)?;
            }
        }
        ProgressEvent::Cancelled { processed } => {
            writeln!(w)?;
            writeln!(w, "Cancelled after {} entries; saving what was merged.", processed)?;
        }
        ProgressEvent::Started { .. }
        | ProgressEvent::Processing { .. }
        | ProgressEvent::Outcome { .. } => {}
    }
    Ok(())
}

/// One dry-run line: would this entry be sent for extraction?
pub fn print_selection(
    w: &mut dyn Write,
    key: &str,
    selection: &Selection,
    color: ColorMode,
) -> std::io::Result<()> {
    let key = if key.is_empty() { "(no key)" } else { key };
    match selection {
        Selection::Eligible => {
            if color.enabled() {
                writeln!(w, "  {} {}", "EXTRACT".green(), key)?;
            } else {
                writeln!(w, "  EXTRACT {}", key)?;
            }
        }
        Selection::Skipped(reason) => {
            if color.enabled() {
                writeln!(w, "  {}    {} ({})", "SKIP".dimmed(), key, reason.dimmed())?;
            } else {
                writeln!(w, "  SKIP    {} ({})", key, reason)?;
            }
        }
    }
    Ok(())
}

fn section_header(w: &mut dyn Write, title: &str, color: ColorMode) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", title.bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "{}", title)?;
        writeln!(w, "{}", sep)?;
    }
    Ok(())
}

/// Print the failed entries and the final counts of a batch.
pub fn print_batch_summary(
    w: &mut dyn Write,
    report: &BatchReport,
    color: ColorMode,
) -> std::io::Result<()> {
    let failures: Vec<_> = report
        .outcomes
        .iter()
        .filter_map(|(key, outcome)| match outcome {
            EntryOutcome::Failed(reason) => Some((key, reason)),
            _ => None,
        })
        .collect();

    if !failures.is_empty() {
        section_header(w, "FAILED ENTRIES", color)?;
        for (key, reason) in &failures {
            if color.enabled() {
                writeln!(w, "  {} {}", key.bold().red(), reason)?;
            } else {
                writeln!(w, "  {} {}", key, reason)?;
            }
        }
    }

    section_header(w, "SUMMARY", color)?;
    let stats = &report.stats;
    writeln!(w, "  Entries processed: {}", stats.total)?;
    if color.enabled() {
        writeln!(w, "  {} {}", "Extracted:".green(), stats.extracted)?;
        writeln!(w, "  {} {}", "Merged:".green(), stats.merged)?;
        writeln!(w, "  {}", format!("Skipped: {}", stats.skipped).dimmed())?;
    } else {
        writeln!(w, "  Extracted: {}", stats.extracted)?;
        writeln!(w, "  Merged: {}", stats.merged)?;
        writeln!(w, "  Skipped: {}", stats.skipped)?;
    }
    if stats.failed > 0 {
        if color.enabled() {
            writeln!(w, "  {} {}", "Failed:".red(), stats.failed)?;
        } else {
            writeln!(w, "  Failed: {}", stats.failed)?;
        }
    }
    if report.cancelled {
        writeln!(w, "  (stopped early)")?;
    }
    writeln!(w)?;
    Ok(())
}

pub fn print_translation_summary(
    w: &mut dyn Write,
    stats: &TranslationStats,
    color: ColorMode,
) -> std::io::Result<()> {
    section_header(w, "TRANSLATION", color)?;
    writeln!(w, "  Translated: {}", stats.translated)?;
    writeln!(w, "  Skipped: {}", stats.skipped)?;
    if stats.failed > 0 {
        if color.enabled() {
            writeln!(w, "  {} {}", "Failed:".red(), stats.failed)?;
        } else {
            writeln!(w, "  Failed: {}", stats.failed)?;
        }
    }
    if !stats.languages.is_empty() {
        let langs: Vec<&str> = stats.languages.iter().map(String::as_str).collect();
        writeln!(w, "  Detected source languages: {}", langs.join(", "))?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print every extracted value that does not occur in the title text.
pub fn print_mismatches(
    w: &mut dyn Write,
    mismatches: &[Mismatch],
    color: ColorMode,
) -> std::io::Result<()> {
    if mismatches.is_empty() {
        if color.enabled() {
            writeln!(w, "{}", "All extracted values occur in their titles.".green())?;
        } else {
            writeln!(w, "All extracted values occur in their titles.")?;
        }
        return Ok(());
    }

    let mut current_key: Option<&str> = None;
    for m in mismatches {
        if current_key != Some(m.key.as_str()) {
            writeln!(w)?;
            if color.enabled() {
                writeln!(w, "{}", m.key.bold())?;
            } else {
                writeln!(w, "{}", m.key)?;
            }
            current_key = Some(m.key.as_str());
        }
        if color.enabled() {
            writeln!(w, "  {}: {}", m.column.yellow(), m.value)?;
        } else {
            writeln!(w, "  {}: {}", m.column, m.value)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} values not found in their titles", mismatches.len())?;
    Ok(())
}

pub fn print_fetch_failure(
    w: &mut dyn Write,
    outcome: &FetchOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    if let FetchStatus::Failed(ref error) = outcome.status {
        if color.enabled() {
            writeln!(w, "{} {}: {}", "ERROR".red(), outcome.key.bold(), error)?;
        } else {
            writeln!(w, "ERROR {}: {}", outcome.key, error)?;
        }
    }
    Ok(())
}

pub fn print_fetch_summary(
    w: &mut dyn Write,
    name: &str,
    stats: &FetchStats,
    color: ColorMode,
) -> std::io::Result<()> {
    let line = format!(
        "Completed {}: {} downloaded, {} errors, {} skipped",
        name, stats.downloaded, stats.failed, stats.skipped
    );
    if color.enabled() && stats.failed > 0 {
        writeln!(w, "{}", line.yellow())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}

/// Print entries without a downloaded scan, grouped by domain.
pub fn print_missing(
    w: &mut dyn Write,
    missing: &BTreeMap<String, Vec<FetchTask>>,
    color: ColorMode,
) -> std::io::Result<()> {
    for (domain, tasks) in missing {
        writeln!(w)?;
        if color.enabled() {
            writeln!(w, "{}:", domain.bold())?;
        } else {
            writeln!(w, "{}:", domain)?;
        }
        for task in tasks {
            if color.enabled() {
                writeln!(w, "  {} :: {}", task.key, task.scan_url.dimmed())?;
            } else {
                writeln!(w, "  {} :: {}", task.key, task.scan_url)?;
            }
        }
    }
    let total: usize = missing.values().map(Vec::len).sum();
    writeln!(w)?;
    writeln!(w, "{} entries missing a scan", total)?;
    Ok(())
}
