//! External model services: text inference, image transcription and
//! machine translation.

pub mod google;
pub mod mock;
pub mod openai;

use std::collections::BTreeSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use base64::Engine;
use thiserror::Error;

pub use google::GoogleTranslate;
pub use openai::OpenAiService;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("expected exactly one choice, got {0}")]
    ChoiceCount(usize),
    #[error("response did not finish (finish reason: {0})")]
    Incomplete(String),
    #[error("response had no content")]
    EmptyResponse,
    #[error("expected {expected} translations, got {got}")]
    TranslationCount { expected: usize, got: usize },
}

/// A base64-encoded image ready to be sent to a vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Read and encode an image file. The MIME type follows the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        };
        Ok(Self::from_bytes(&bytes, mime))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A language model that answers free-text requests.
pub trait InferenceService: Send + Sync {
    /// Short name used in logs and run tags (e.g. the model id).
    fn name(&self) -> &str;

    /// Send `context` and `content` as user messages and `instructions` as the
    /// system message; return the raw response text.
    fn infer<'a>(
        &'a self,
        context: &'a str,
        content: &'a str,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>>;

    /// Transcribe the text visible in `image`.
    fn transcribe<'a>(
        &'a self,
        image: &'a ImagePayload,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>>;
}

/// Result of a batch translation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    /// One output per input, in order. Empty inputs stay empty.
    pub texts: Vec<String>,
    /// Source languages detected across the batch.
    pub languages: BTreeSet<String>,
}

/// A machine translation backend targeting English.
pub trait TranslationService: Send + Sync {
    fn name(&self) -> &str;

    fn translate<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Translation, ServiceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_payload_encoding() {
        let image = ImagePayload::from_bytes(b"abc", "image/png");
        assert_eq!(image.data, "YWJj");
        assert_eq!(image.data_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn image_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a1.JPEG");
        std::fs::write(&path, b"\xff\xd8").unwrap();
        assert_eq!(ImagePayload::from_path(&path).unwrap().mime_type, "image/jpeg");
    }
}
