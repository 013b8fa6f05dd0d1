// Gemini `generateContent` client.
//
// Sends one prompt (plus an optional inline image) and returns the model's
// text with token usage. Non-success statuses, safety blocks and empty
// candidates are mapped onto `LlmError` so the retry loop can tell transient
// failures from permanent ones.

use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use baht_core::config::Config;

use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

/// `finishReason` values that mean the answer was withheld.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Image bytes sent inline with the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// The model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: GEMINI_API_BASE.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    /// Point the client at another host (a proxy, or a local server in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Per-request timeout. Falls back to no timeout if the HTTP client
    /// cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(http) = reqwest::Client::builder().timeout(timeout).build() {
            self.http = http;
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// JSON body for a `generateContent` call.
    pub fn request_body(&self, system: &str, prompt: &str, image: Option<&InlineImage>) -> Value {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(image) = image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&image.data),
                }
            }));
        }
        json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json",
            }
        })
    }

    /// Send one request. No retries happen here.
    pub async fn generate(
        &self,
        system: &str,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<Generation, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NotConfigured);
        }

        let body = self.request_body(system, prompt, image);
        debug!(model = %self.model, has_image = image.is_some(), "sending generateContent");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), extract_error_message(&text)));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("response is not JSON: {e}")))?;
        let generation = parse_generation(&value)?;
        debug!(
            input_tokens = generation.input_tokens,
            output_tokens = generation.output_tokens,
            "generateContent complete"
        );
        Ok(generation)
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either a configured Gemini client or disabled.
pub enum LlmClient {
    /// Gemini API is configured and ready.
    Active(GeminiClient),
    /// AI reading is disabled (no API key configured).
    Disabled,
}

impl LlmClient {
    /// Returns `Active` if a Gemini API key is present in credentials,
    /// otherwise `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.gemini_api_key {
            Some(key) if !key.is_empty() => {
                let ai = &config.ai;
                LlmClient::Active(
                    GeminiClient::new(key.clone(), ai.model.clone())
                        .with_generation(ai.temperature, ai.max_output_tokens)
                        .with_timeout(Duration::from_secs(ai.timeout_secs)),
                )
            }
            _ => LlmClient::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    pub async fn generate(
        &self,
        system: &str,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<Generation, LlmError> {
        match self {
            LlmClient::Active(client) => client.generate(system, prompt, image).await,
            LlmClient::Disabled => Err(LlmError::NotConfigured),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON parsing helpers
// ---------------------------------------------------------------------------

/// Pull the model text and usage out of a `generateContent` response.
///
/// Expected shape:
/// `{ "candidates": [{ "content": { "parts": [{ "text": "..." }] }, "finishReason": "STOP" }],
///    "usageMetadata": { "promptTokenCount": N, "candidatesTokenCount": M } }`
pub(crate) fn parse_generation(v: &Value) -> Result<Generation, LlmError> {
    if let Some(reason) = v
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(LlmError::Safety(format!("prompt blocked: {reason}")));
    }

    let candidate = v
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or(LlmError::EmptyResponse)?;

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        if BLOCKED_FINISH_REASONS.contains(&reason) {
            return Err(LlmError::Safety(format!("answer blocked: {reason}")));
        }
    }

    let text: String = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    let usage = v.get("usageMetadata");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(0)
    };

    Ok(Generation {
        text,
        input_tokens: count("promptTokenCount"),
        output_tokens: count("candidatesTokenCount"),
    })
}

/// `error.message` from a Google API error body, or the raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    // -- Response parsing --

    #[test]
    fn parse_text_and_usage() {
        let v = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "{\"total\":" }, { "text": " 107}" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 1200, "candidatesTokenCount": 85, "totalTokenCount": 1285 }
        });
        let g = parse_generation(&v).unwrap();
        assert_eq!(g.text, "{\"total\": 107}");
        assert_eq!(g.input_tokens, 1200);
        assert_eq!(g.output_tokens, 85);
    }

    #[test]
    fn parse_missing_usage_defaults_to_zero() {
        let v = json!({ "candidates": [{ "content": { "parts": [{ "text": "{}" }] } }] });
        let g = parse_generation(&v).unwrap();
        assert_eq!((g.input_tokens, g.output_tokens), (0, 0));
    }

    #[test]
    fn parse_prompt_block_is_safety() {
        let v = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(matches!(parse_generation(&v), Err(LlmError::Safety(_))));
    }

    #[test]
    fn parse_safety_finish_reason() {
        let v = json!({ "candidates": [{ "finishReason": "SAFETY", "content": { "parts": [] } }] });
        assert!(matches!(parse_generation(&v), Err(LlmError::Safety(_))));
    }

    #[test]
    fn parse_empty_candidates_is_empty_response() {
        assert_eq!(parse_generation(&json!({})), Err(LlmError::EmptyResponse));
        assert_eq!(
            parse_generation(&json!({ "candidates": [] })),
            Err(LlmError::EmptyResponse)
        );
        let blank = json!({ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] });
        assert_eq!(parse_generation(&blank), Err(LlmError::EmptyResponse));
    }

    #[test]
    fn error_message_extraction() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(extract_error_message(body), "Resource has been exhausted");
        assert_eq!(extract_error_message("  bad gateway \n"), "bad gateway");
    }

    // -- Request body --

    #[test]
    fn request_body_inlines_image_as_base64() {
        let client = GeminiClient::new("k".into(), "gemini-2.0-flash".into()).with_generation(0.2, 512);
        let image = InlineImage {
            mime_type: "image/png".into(),
            data: b"hello".to_vec(),
        };
        let body = client.request_body("sys", "read this", Some(&image));

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "read this");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "aGVsbG8=");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    // -- LlmClient wrapper --

    #[tokio::test]
    async fn disabled_client_is_not_configured() {
        let client = LlmClient::Disabled;
        assert!(!client.is_enabled());
        assert_eq!(
            client.generate("s", "p", None).await,
            Err(LlmError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn empty_api_key_is_not_configured() {
        let client = GeminiClient::new(String::new(), "m".into());
        assert_eq!(
            client.generate("s", "p", None).await,
            Err(LlmError::NotConfigured)
        );
    }

    // -- Mock HTTP server --

    /// Serve a single HTTP response and hand back the raw request text.
    async fn serve_once(status_line: &'static str, body: String) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = vec![0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn mock_server_full_flow() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"vendor_name\":\"Makro\"}" }] }, "finishReason": "STOP" }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5 }
        })
        .to_string();
        let (addr, server) = serve_once("200 OK", body).await;

        let client = GeminiClient::new("test-key".into(), "gemini-2.0-flash".into())
            .with_base_url(format!("http://{addr}/"));
        let image = InlineImage {
            mime_type: "image/jpeg".into(),
            data: vec![0xff, 0xd8, 0xff],
        };
        let g = client.generate("system", "prompt", Some(&image)).await.unwrap();
        assert_eq!(g.text, "{\"vendor_name\":\"Makro\"}");
        assert_eq!(g.output_tokens, 5);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1beta/models/gemini-2.0-flash:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains("\"inline_data\""));
    }

    #[tokio::test]
    async fn mock_server_quota_error() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        let (addr, server) = serve_once("429 Too Many Requests", body.to_string()).await;

        let client = GeminiClient::new("k".into(), "m".into()).with_base_url(format!("http://{addr}"));
        let err = client.generate("s", "p", None).await.unwrap_err();
        assert_eq!(err, LlmError::Quota("Resource has been exhausted".into()));
        assert!(!err.is_retryable());
        let _ = server.await;
    }

    #[tokio::test]
    async fn mock_server_unavailable_is_retryable() {
        let body = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        let (addr, server) = serve_once("503 Service Unavailable", body.to_string()).await;

        let client = GeminiClient::new("k".into(), "m".into()).with_base_url(format!("http://{addr}"));
        let err = client.generate("s", "p", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Server { status: 503, .. }));
        assert!(err.is_retryable());
        let _ = server.await;
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let client = GeminiClient::new("k".into(), "m".into()).with_base_url(format!("http://{addr}"));
        let err = client.generate("s", "p", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
