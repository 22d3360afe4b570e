//! Mock services for tests and offline runs.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ImagePayload, InferenceService, ServiceError, Translation, TranslationService};

/// A configurable reply for [`MockInference`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this text as the model response.
    Text(String),
    /// Fail the call with an HTTP 500 carrying this body.
    Error(String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }
}

/// One recorded call to [`MockInference`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub context: String,
    pub content: String,
    pub instructions: String,
}

/// A hand-rolled mock implementing [`InferenceService`].
///
/// Supports a fixed reply or a sequence of replies (the fallback is used once
/// the sequence is exhausted), optional per-call latency, call counting and
/// request recording.
pub struct MockInference {
    name: String,
    /// Popped from the back; stored reversed.
    replies: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockInference {
    /// A mock that always returns `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            name: "mock".to_string(),
            replies: Mutex::new(Vec::new()),
            fallback: reply,
            delay: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A mock that returns `replies` in order, then `fallback` forever.
    pub fn with_sequence(mut replies: Vec<MockReply>, fallback: MockReply) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            ..Self::new(fallback)
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, context: &str, content: &str, instructions: &str) -> MockReply {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                context: context.to_string(),
                content: content.to_string(),
                instructions: instructions.to_string(),
            });
        let mut seq = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }

    fn respond(
        &self,
        reply: MockReply,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'static>> {
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match reply {
                MockReply::Text(text) => Ok(text),
                MockReply::Error(body) => Err(ServiceError::Api { status: 500, body }),
            }
        })
    }
}

impl InferenceService for MockInference {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer<'a>(
        &'a self,
        context: &'a str,
        content: &'a str,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        let reply = self.record(context, content, instructions);
        self.respond(reply)
    }

    fn transcribe<'a>(
        &'a self,
        image: &'a ImagePayload,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        let reply = self.record("", &image.data_url(), instructions);
        self.respond(reply)
    }
}

/// A mock [`TranslationService`] that prefixes every non-empty text with
/// `"[en] "` and reports a fixed source language.
pub struct MockTranslator {
    language: String,
    fail: bool,
    call_count: AtomicUsize,
}

impl MockTranslator {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            fail: false,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A translator whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl TranslationService for MockTranslator {
    fn name(&self) -> &str {
        "mock"
    }

    fn translate<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Translation, ServiceError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.fail {
                return Err(ServiceError::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(Translation {
                texts: texts
                    .iter()
                    .map(|t| {
                        if t.is_empty() {
                            String::new()
                        } else {
                            format!("[en] {}", t)
                        }
                    })
                    .collect(),
                languages: BTreeSet::from([self.language.clone()]),
            })
        })
    }
}
