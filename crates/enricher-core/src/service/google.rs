//! Google Cloud Translation (v3 REST) client.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{ServiceError, Translation, TranslationService};
use crate::Config;

pub const DEFAULT_BASE_URL: &str = "https://translation.googleapis.com";

pub struct GoogleTranslate {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
    target_language: String,
}

impl std::fmt::Debug for GoogleTranslate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleTranslate")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("access_token", &"***")
            .field("target_language", &self.target_language)
            .finish()
    }
}

impl GoogleTranslate {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.into(),
            access_token: access_token.into(),
            target_language: "en".to_string(),
        }
    }

    /// Build from config. Returns `None` unless both an access token and a
    /// project id are configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let token = config.google_access_token.as_deref()?.trim();
        let project = config.google_project_id.as_deref()?.trim();
        if token.is_empty() || project.is_empty() {
            return None;
        }
        let mut svc = Self::new(project, token);
        svc.client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Some(svc)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn translate_texts(&self, texts: &[String]) -> Result<Translation, ServiceError> {
        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(Translation {
                texts: texts.to_vec(),
                languages: BTreeSet::new(),
            });
        }

        let url = format!(
            "{}/v3/projects/{}/locations/global:translateText",
            self.base_url, self.project_id
        );
        let contents: Vec<&str> = pending.iter().map(|&i| texts[i].as_str()).collect();
        let body = json!({
            "contents": contents,
            "targetLanguageCode": self.target_language,
            "mimeType": "text/plain",
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("x-goog-user-project", &self.project_id)
            .json(&body)
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

        let parsed: TranslateResponse = resp.json().await?;
        if parsed.translations.len() != pending.len() {
            return Err(ServiceError::TranslationCount {
                expected: pending.len(),
                got: parsed.translations.len(),
            });
        }

        let mut out = texts.to_vec();
        let mut languages = BTreeSet::new();
        for (i, t) in pending.into_iter().zip(parsed.translations) {
            out[i] = t.translated_text;
            if let Some(lang) = t.detected_language_code.filter(|l| !l.is_empty()) {
                languages.insert(lang);
            }
        }
        Ok(Translation {
            texts: out,
            languages,
        })
    }
}

impl TranslationService for GoogleTranslate {
    fn name(&self) -> &str {
        "google"
    }

    fn translate<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Translation, ServiceError>> + Send + 'a>> {
        Box::pin(self.translate_texts(texts))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<TranslatedText>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslatedText {
    translated_text: String,
    detected_language_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn empty_inputs_skip_the_request() {
        // No server: any HTTP attempt would fail.
        let svc = GoogleTranslate::new("p", "t").with_base_url("http://127.0.0.1:9");
        let texts = vec![String::new(), String::new()];
        let out = svc.translate(&texts).await.unwrap();
        assert_eq!(out.texts, texts);
        assert!(out.languages.is_empty());
    }

    #[tokio::test]
    async fn translates_non_empty_texts_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/projects/euclid/locations/global:translateText"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({
                "contents": ["Les Elemens", "A Paris"],
                "targetLanguageCode": "en",
                "mimeType": "text/plain"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "translations": [
                    {"translatedText": "The Elements", "detectedLanguageCode": "fr"},
                    {"translatedText": "In Paris & Lyon", "detectedLanguageCode": "fr"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = GoogleTranslate::new("euclid", "token").with_base_url(&server.uri());
        let texts = vec!["Les Elemens".to_string(), String::new(), "A Paris".to_string()];
        let out = svc.translate(&texts).await.unwrap();
        assert_eq!(out.texts, vec!["The Elements", "", "In Paris & Lyon"]);
        assert_eq!(out.languages.into_iter().collect::<Vec<_>>(), vec!["fr"]);
    }

    #[tokio::test]
    async fn plain_text_output_is_kept_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"mimeType": "text/plain"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "translations": [
                    {"translatedText": "Élémens d'Euclide <&> &eacute;", "detectedLanguageCode": "fr"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = GoogleTranslate::new("p", "t").with_base_url(&server.uri());
        let out = svc.translate(&["Elemens d'Euclide".to_string()]).await.unwrap();
        assert_eq!(out.texts, vec!["Élémens d'Euclide <&> &eacute;"]);
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"translations": []})))
            .mount(&server)
            .await;

        let svc = GoogleTranslate::new("p", "t").with_base_url(&server.uri());
        let err = svc.translate(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::TranslationCount {
                expected: 1,
                got: 0
            }
        ));
    }

    #[test]
    fn requires_token_and_project() {
        let mut config = Config {
            google_access_token: Some("token".into()),
            ..Config::default()
        };
        assert!(GoogleTranslate::from_config(&config).is_none());
        config.google_project_id = Some("euclid".into());
        assert!(GoogleTranslate::from_config(&config).is_some());
    }
}
