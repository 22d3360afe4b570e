//! Transcription of scanned title-page images with a vision model.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, Entry, KEY_COLUMN};
use crate::service::{ImagePayload, InferenceService};

pub const TRANSCRIPTION_COLUMN: &str = "transcription";

pub const TRANSCRIPTION_INSTRUCTIONS: &str = "Please transcribe the text in this image. \
Keep the original formatting, whitespace, line breaks (even at the middle of a sentence) and punctuation as much as possible. \
Ignore handwriting, library markings and printer's device or other illustrations. \
Only return the transcription of the text in the image.";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Image files directly inside `dir`, in natural file-name order
/// (`a2.png` before `a10.png`).
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let path = item?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(images)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let a_end = a.find(|c: char| !c.is_ascii_digit()).unwrap_or(a.len());
                let b_end = b.find(|c: char| !c.is_ascii_digit()).unwrap_or(b.len());
                let (na, nb) = (a[..a_end].trim_start_matches('0'), b[..b_end].trim_start_matches('0'));
                let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = &a[a_end..];
                b = &b[b_end..];
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a = &a[x.len_utf8()..];
                b = &b[y.len_utf8()..];
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct TranscriptionReport {
    /// One row per transcribed image: `key` (file name) and `transcription`.
    pub catalog: Catalog,
    /// Images that could not be read or transcribed, with the error.
    pub failed: Vec<(PathBuf, String)>,
}

/// Transcribe `images` in order. Failures are logged and skipped.
pub async fn transcribe_images(
    images: &[PathBuf],
    service: &dyn InferenceService,
    progress: impl Fn(usize, usize, &Path),
    cancel: CancellationToken,
) -> TranscriptionReport {
    let mut entries = Vec::new();
    let mut failed = Vec::new();

    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        progress(i, images.len(), path);

        let result = match ImagePayload::from_path(path) {
            Ok(image) => service
                .transcribe(&image, TRANSCRIPTION_INSTRUCTIONS)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(text) => {
                entries.push(Entry::from_pairs([
                    (KEY_COLUMN.to_string(), file_name(path)),
                    (TRANSCRIPTION_COLUMN.to_string(), text.trim().to_string()),
                ]));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "transcription failed");
                failed.push((path.clone(), e));
            }
        }
    }

    TranscriptionReport {
        catalog: Catalog::from_parts(
            vec![KEY_COLUMN.to_string(), TRANSCRIPTION_COLUMN.to_string()],
            entries,
        ),
        failed,
    }
}
