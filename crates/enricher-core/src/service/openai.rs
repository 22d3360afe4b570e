//! OpenAI-compatible chat completions client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ImagePayload, InferenceService, ServiceError};
use crate::Config;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for OpenAiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiService")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiService {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    /// Build from config. Returns `None` when no API key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let key = config.openai_api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        Some(
            Self::new(key)
                .with_base_url(&config.openai_base_url)
                .with_model(&config.model)
                .with_max_tokens(config.max_tokens)
                .with_timeout(Duration::from_secs(config.request_timeout_secs)),
        )
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    async fn complete(&self, messages: Vec<ChatMessage<'_>>) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        single_choice_content(parsed)
    }
}

impl InferenceService for OpenAiService {
    fn name(&self) -> &str {
        &self.model
    }

    fn infer<'a>(
        &'a self,
        context: &'a str,
        content: &'a str,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            self.complete(vec![
                ChatMessage::text("user", context),
                ChatMessage::text("user", content),
                ChatMessage::text("system", instructions),
            ])
            .await
        })
    }

    fn transcribe<'a>(
        &'a self,
        image: &'a ImagePayload,
        instructions: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let message = ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: instructions },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ]),
            };
            self.complete(vec![message]).await.map(|t| t.trim().to_string())
        })
    }
}

/// Accept only a single finished choice with non-empty content.
fn single_choice_content(resp: ChatResponse) -> Result<String, ServiceError> {
    if resp.choices.len() != 1 {
        tracing::warn!(choices = resp.choices.len(), "unexpected number of choices");
        return Err(ServiceError::ChoiceCount(resp.choices.len()));
    }
    let Some(choice) = resp.choices.into_iter().next() else {
        return Err(ServiceError::ChoiceCount(0));
    };
    match choice.finish_reason.as_deref() {
        Some("stop") => {}
        other => {
            let reason = other.unwrap_or("none").to_string();
            tracing::warn!(finish_reason = %reason, "model did not finish the request");
            return Err(ServiceError::Incomplete(reason));
        }
    }
    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ServiceError::EmptyResponse),
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

impl<'a> ChatMessage<'a> {
    fn text(role: &'static str, text: &'a str) -> Self {
        Self {
            role,
            content: MessageContent::Text(text),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(choices: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "choices": choices }))
    }

    async fn service_for(server: &MockServer) -> OpenAiService {
        OpenAiService::new("sk-test").with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn infer_sends_three_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "temperature": 0.0,
                "messages": [
                    {"role": "user", "content": "Transcription language: FRENCH"},
                    {"role": "user", "content": "EUCLIDE"},
                    {"role": "system", "content": "Return JSON"}
                ]
            })))
            .respond_with(completion(json!([
                {"message": {"content": "{\"a\": \"b\"}"}, "finish_reason": "stop"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service_for(&server).await;
        let text = svc
            .infer("Transcription language: FRENCH", "EUCLIDE", "Return JSON")
            .await
            .unwrap();
        assert_eq!(text, "{\"a\": \"b\"}");
    }

    #[tokio::test]
    async fn truncated_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion(json!([
                {"message": {"content": "{\"a\":"}, "finish_reason": "length"}
            ])))
            .mount(&server)
            .await;

        let err = service_for(&server)
            .await
            .infer("c", "t", "i")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Incomplete(r) if r == "length"));
    }

    #[tokio::test]
    async fn multiple_choices_is_an_error() {
        let server = MockServer::start().await;
        let choice = json!({"message": {"content": "x"}, "finish_reason": "stop"});
        Mock::given(method("POST"))
            .respond_with(completion(json!([choice.clone(), choice])))
            .mount(&server)
            .await;

        let err = service_for(&server)
            .await
            .infer("c", "t", "i")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ChoiceCount(2)));
    }

    #[tokio::test]
    async fn http_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = service_for(&server)
            .await
            .infer("c", "t", "i")
            .await
            .unwrap_err();
        match err {
            ServiceError::Api { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transcribe_sends_image_part() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "Transcribe"},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,YWJj"}}
                    ]
                }]
            })))
            .respond_with(completion(json!([
                {"message": {"content": "  LES ELEMENS\n"}, "finish_reason": "stop"}
            ])))
            .mount(&server)
            .await;

        let image = ImagePayload::from_bytes(b"abc", "image/png");
        let text = service_for(&server)
            .await
            .transcribe(&image, "Transcribe")
            .await
            .unwrap();
        assert_eq!(text, "LES ELEMENS");
    }

    #[test]
    fn no_key_means_no_service() {
        let config = Config::default();
        assert!(OpenAiService::from_config(&config).is_none());

        let config = Config {
            openai_api_key: Some("  ".into()),
            ..Config::default()
        };
        assert!(OpenAiService::from_config(&config).is_none());
    }

    #[test]
    fn debug_masks_key() {
        let debug = format!("{:?}", OpenAiService::new("sk-secret"));
        assert!(!debug.contains("sk-secret"));
    }
}
