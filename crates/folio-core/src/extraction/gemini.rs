//! Gemini extraction client
//!
//! Sends each chunk inline (base64) to `generateContent` and parses the text
//! of the first candidate. Rate-limited calls are retried with exponential
//! backoff; every other failure surfaces immediately.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{parse_response, ExtractionClient, ExtractionResult};
use crate::error::{Error, Result};
use crate::storage::MimeKind;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const SYSTEM_INSTRUCTION: &str = "You extract structured data from financial and identity \
documents. Read every page you are given. Copy numbers and dates exactly as printed. \
Answer with JSON only.";

/// Backoff applied to rate-limited extraction calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries)
    }
}

/// Gemini `generateContent` client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    /// Create a new client with the given API key and model
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the client at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn generate_once(&self, request: &GenerateRequest) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| Error::Config("Invalid Gemini API key".to_string()))?,
        );

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExtractionService {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response.json().await?;
        if let Some(usage) = &generated.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        let candidate = generated.candidates.into_iter().next();
        if let Some(reason) = candidate.as_ref().and_then(|c| c.finish_reason.as_deref()) {
            if reason == "MAX_TOKENS" {
                warn!("Gemini response hit the output token limit, JSON may be truncated");
            }
        }

        let text = candidate
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }
}

#[async_trait]
impl ExtractionClient for GeminiClient {
    async fn extract(
        &self,
        chunk: &[u8],
        mime: MimeKind,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<ExtractionResult> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_INSTRUCTION)],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime.mime_type().to_string(),
                            data: BASE64_STANDARD.encode(chunk),
                        }),
                    },
                    Part::text(prompt),
                ],
            }],
            generation_config: GenerationConfig {
                max_output_tokens,
                temperature: 0.0,
                response_mime_type: "application/json".to_string(),
            },
        };

        let attempt = || async { self.generate_once(&request).await };
        let text = attempt
            .retry(self.retry.backoff())
            .when(Error::is_rate_limited)
            .notify(|err: &Error, delay: Duration| {
                warn!(
                    model = %self.model,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Extraction rate limited, retrying"
                );
            })
            .await?;

        Ok(parse_response(&text))
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/models/test-model:generateContent";

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key", "test-model")
            .with_base_url(&server.uri())
            .with_retry(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
            })
    }

    fn text_response(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 900, "candidatesTokenCount": 12}
        })
    }

    #[tokio::test]
    async fn test_extract_parses_fenced_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("Here is the data:\n```json\n{\"a\":1}\n```")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .extract(b"%PDF-1.4", MimeKind::Pdf, "Extract.", 256)
            .await
            .unwrap();

        assert!(!result.parse_error);
        assert_eq!(result.fields["a"], json!(1));
    }

    #[tokio::test]
    async fn test_request_carries_inline_document_and_token_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("{}")))
            .mount(&server)
            .await;

        client(&server)
            .extract(b"PNGDATA", MimeKind::Png, "Read the card.", 2048)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(
            parts[0]["inlineData"]["data"],
            BASE64_STANDARD.encode(b"PNGDATA")
        );
        assert_eq!(parts[1]["text"], "Read the card.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server)
            .extract(b"%PDF", MimeKind::Pdf, "Extract.", 256)
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_rate_limit_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("{\"ok\": true}")))
            .mount(&server)
            .await;

        let result = client(&server)
            .extract(b"%PDF", MimeKind::Pdf, "Extract.", 256)
            .await
            .unwrap();
        assert_eq!(result.fields["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .extract(b"%PDF", MimeKind::Pdf, "Extract.", 256)
            .await
            .unwrap_err();

        match err {
            Error::ExtractionService { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_become_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let result = client(&server)
            .extract(b"%PDF", MimeKind::Pdf, "Extract.", 256)
            .await
            .unwrap();
        assert!(result.parse_error);
    }
}
