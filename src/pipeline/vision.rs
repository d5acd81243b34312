//! Vision model calls: request shape, the [`VisionClient`] seam, and the
//! blocking HTTP client behind it.
//!
//! One call sends one PNG as a `data:` URL inside an OpenAI-style chat
//! completion request and returns `choices[0].message.content`. The reply is
//! parsed inside the retried call, so a parse failure goes through the same
//! rate-limit classification as a transport or status failure.

use crate::error::{IngestError, VisionError};
use crate::pipeline::encode::png_data_url;
use crate::pipeline::response::{extract_json_object, lines_or_text, string_field};
use crate::pipeline::retry::RetryRunner;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the bearer key.
pub const ENV_API_KEY: &str = "VISION_API_KEY";
/// Environment variable overriding the API base URL.
pub const ENV_API_BASE: &str = "VISION_API_BASE";
/// Base URL used when [`ENV_API_BASE`] is unset.
pub const DEFAULT_API_BASE: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Response bodies quoted in errors are cut to this many characters.
const ERROR_BODY_CHARS: usize = 500;

// ── Request ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

impl ChatRequest {
    /// A system prompt plus one user turn carrying `instruction` and a PNG.
    pub fn vision(
        model: &str,
        system_prompt: &str,
        instruction: &str,
        png: &[u8],
        response_format: ResponseFormat,
    ) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: MessageContent::Text(system_prompt.to_string()),
                },
                ChatMessage {
                    role: Role::User,
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: instruction.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: png_data_url(png),
                            },
                        },
                    ]),
                },
            ],
            response_format,
            stream: false,
        }
    }
}

// ── Client seam ──────────────────────────────────────────────────────────

/// One synchronous chat-completion attempt.
pub trait VisionClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String, VisionError>;
}

impl<T: VisionClient + ?Sized> VisionClient for &T {
    fn complete(&self, request: &ChatRequest) -> Result<String, VisionError> {
        (**self).complete(request)
    }
}

impl<T: VisionClient + ?Sized> VisionClient for Box<T> {
    fn complete(&self, request: &ChatRequest) -> Result<String, VisionError> {
        (**self).complete(request)
    }
}

/// Where and how to reach the vision service.
#[derive(Clone, PartialEq)]
pub struct VisionEndpoint {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for VisionEndpoint {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(180),
        }
    }
}

impl std::fmt::Debug for VisionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionEndpoint")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VisionEndpoint {
    /// Read [`ENV_API_KEY`] and [`ENV_API_BASE`].
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut endpoint = Self {
            api_key: non_empty(ENV_API_KEY),
            ..Self::default()
        };
        if let Some(base) = non_empty(ENV_API_BASE) {
            endpoint.base_url = base;
        }
        endpoint
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Blocking HTTP implementation of [`VisionClient`].
#[derive(Debug)]
pub struct HttpVisionClient {
    endpoint: VisionEndpoint,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl HttpVisionClient {
    /// Fails with [`VisionError::NotConfigured`] when no key is set.
    pub fn new(endpoint: VisionEndpoint) -> Result<Self, VisionError> {
        let api_key = endpoint.api_key.clone().ok_or(VisionError::NotConfigured)?;
        let http = reqwest::blocking::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| VisionError::Transport(e.to_string()))?;
        Ok(Self {
            endpoint,
            api_key,
            http,
        })
    }

    pub fn from_env() -> Result<Self, VisionError> {
        Self::new(VisionEndpoint::from_env())
    }
}

impl VisionClient for HttpVisionClient {
    fn complete(&self, request: &ChatRequest) -> Result<String, VisionError> {
        let url = self.endpoint.completions_url();
        debug!("POST {} (model {})", url, request.model);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .map_err(|e| VisionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| VisionError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(VisionError::Status {
                status: status.as_u16(),
                body: clip(&body),
            });
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|e| VisionError::MalformedBody(format!("{e}: {}", clip(&body))))?;
        content_from_response(&value)
    }
}

/// `choices[0].message.content` of a chat-completion body.
pub fn content_from_response(body: &Value) -> Result<String, VisionError> {
    let content = body
        .pointer("/choices/0/message/content")
        .ok_or_else(|| VisionError::MalformedBody(clip(&body.to_string())))?;
    match content {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::String(_) | Value::Null => Err(VisionError::EmptyContent),
        other => Err(VisionError::MalformedBody(clip(&other.to_string()))),
    }
}

fn clip(s: &str) -> String {
    s.chars().take(ERROR_BODY_CHARS).collect()
}

// ── Calls ────────────────────────────────────────────────────────────────

/// OCR one page image. Empty text is an error.
pub fn ocr_page_image(
    client: &dyn VisionClient,
    runner: &RetryRunner,
    model: &str,
    system_prompt: &str,
    png: &[u8],
) -> Result<String, IngestError> {
    let request = ChatRequest::vision(
        model,
        system_prompt,
        crate::prompts::PAGE_OCR_INSTRUCTION,
        png,
        ResponseFormat::JsonObject,
    );
    runner.run(|| {
        let content = client.complete(&request)?;
        let text = lines_or_text(&extract_json_object(&content)?);
        if text.trim().is_empty() {
            return Err(IngestError::EmptyModelOutput);
        }
        Ok(text)
    })
}

/// Reply of one cell recognition call.
#[derive(Debug, Clone, PartialEq)]
pub enum CellReply {
    /// The `latex` field; empty when the cell has no formula.
    Latex(String),
    /// The reply could not be parsed; carries the parse error message.
    Unparseable(String),
}

/// Recognise the formula in one cell crop. Upstream failures are returned as
/// `Err`; a reply that still fails to parse once the retry wrapper gives it
/// back is a [`CellReply::Unparseable`].
pub fn recognize_cell_image(
    client: &dyn VisionClient,
    runner: &RetryRunner,
    model: &str,
    system_prompt: &str,
    png: &[u8],
) -> Result<CellReply, IngestError> {
    let request = ChatRequest::vision(
        model,
        system_prompt,
        crate::prompts::TABLE_CELL_INSTRUCTION,
        png,
        ResponseFormat::Text,
    );
    let reply = runner.run(|| {
        let content = client.complete(&request)?;
        extract_json_object(&content)
    });
    match reply {
        Ok(obj) => Ok(CellReply::Latex(string_field(&obj, "latex").unwrap_or_default())),
        Err(e @ IngestError::JsonUnparseable { .. }) => Ok(CellReply::Unparseable(e.to_string())),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retry::{NoJitter, RetryPolicy, Sleeper};
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Result<String, VisionError>>>);

    impl Scripted {
        fn new(mut replies: Vec<Result<String, VisionError>>) -> Self {
            replies.reverse();
            Self(Mutex::new(replies))
        }
    }

    impl VisionClient for Scripted {
        fn complete(&self, _request: &ChatRequest) -> Result<String, VisionError> {
            self.0.lock().unwrap().pop().unwrap_or(Err(VisionError::EmptyContent))
        }
    }

    struct NoSleep;
    impl Sleeper for NoSleep {
        fn sleep(&self, _d: Duration) {}
    }

    fn runner() -> RetryRunner {
        RetryRunner::new(RetryPolicy::default())
            .with_sleeper(NoSleep)
            .with_jitter(NoJitter)
    }

    #[test]
    fn request_serialises_to_chat_completion_shape() {
        let req = ChatRequest::vision("m", "sys", "do it", b"png", ResponseFormat::JsonObject);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "m");
        assert_eq!(v["stream"], false);
        assert_eq!(v["response_format"], json!({"type": "json_object"}));
        assert_eq!(v["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(v["messages"][1]["content"][0], json!({"type": "text", "text": "do it"}));
        let url = v["messages"][1]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn content_extraction() {
        let body = json!({"choices": [{"message": {"content": "{\"text\":\"x\"}"}}]});
        assert_eq!(content_from_response(&body).unwrap(), "{\"text\":\"x\"}");
        let empty = json!({"choices": [{"message": {"content": ""}}]});
        assert!(matches!(content_from_response(&empty), Err(VisionError::EmptyContent)));
        let null = json!({"choices": [{"message": {"content": null}}]});
        assert!(matches!(content_from_response(&null), Err(VisionError::EmptyContent)));
        let missing = json!({"error": {"code": "1305"}});
        let err = content_from_response(&missing).unwrap_err();
        assert!(matches!(err, VisionError::MalformedBody(_)));
        assert!(err.to_string().contains("1305"));
    }

    #[test]
    fn endpoint_from_lookup() {
        let e = VisionEndpoint::from_lookup(|k| match k {
            ENV_API_KEY => Some("secret".into()),
            ENV_API_BASE => Some("http://localhost:9/v1/".into()),
            _ => None,
        });
        assert_eq!(e.api_key.as_deref(), Some("secret"));
        assert_eq!(e.completions_url(), "http://localhost:9/v1/chat/completions");
        assert!(!format!("{:?}", e).contains("secret"));
        assert_eq!(VisionEndpoint::from_lookup(|_| None).base_url, DEFAULT_API_BASE);
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = HttpVisionClient::new(VisionEndpoint::default()).unwrap_err();
        assert!(matches!(err, VisionError::NotConfigured));
    }

    #[test]
    fn ocr_reads_lines_after_rate_limit() {
        let client = Scripted::new(vec![
            Err(VisionError::Status {
                status: 429,
                body: "slow down".into(),
            }),
            Ok("```json\n{\"lines\": [\"a\", null, \"\\\\(x\\\\)\"]}\n```".into()),
        ]);
        let text = ocr_page_image(&client, &runner(), "m", "sys", b"png").unwrap();
        assert_eq!(text, "a\n\\(x\\)");
    }

    #[test]
    fn ocr_empty_text_is_an_error() {
        let client = Scripted::new(vec![Ok("{\"lines\": []}".into())]);
        let err = ocr_page_image(&client, &runner(), "m", "sys", b"png").unwrap_err();
        assert!(matches!(err, IngestError::EmptyModelOutput));
    }

    #[test]
    fn ocr_fatal_status_is_not_retried() {
        let client = Scripted::new(vec![
            Err(VisionError::Status {
                status: 401,
                body: "bad key".into(),
            }),
            Ok("{\"text\": \"never\"}".into()),
        ]);
        let err = ocr_page_image(&client, &runner(), "m", "sys", b"png").unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn rate_limited_unparseable_reply_is_retried() {
        let client = Scripted::new(vec![
            Ok("Error 1305: rate limited, try later".into()),
            Ok(r#"{"latex": "x"}"#.into()),
        ]);
        assert_eq!(
            recognize_cell_image(&client, &runner(), "m", "sys", b"png").unwrap(),
            CellReply::Latex("x".into())
        );
        assert!(client.0.lock().unwrap().is_empty());
    }

    #[test]
    fn plain_unparseable_reply_is_not_retried() {
        let client = Scripted::new(vec![Ok("sorry, no formula".into()), Ok(r#"{"latex": "x"}"#.into())]);
        match recognize_cell_image(&client, &runner(), "m", "sys", b"png").unwrap() {
            CellReply::Unparseable(msg) => assert!(msg.contains("sorry, no formula"), "got: {msg}"),
            other => panic!("expected Unparseable, got {:?}", other),
        }
        assert_eq!(client.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn cell_reply_variants() {
        let client = Scripted::new(vec![
            Ok(r#"{"latex": "\\beta"}"#.into()),
            Ok("no json here".into()),
            Ok("{}".into()),
        ]);
        let r = runner();
        assert_eq!(
            recognize_cell_image(&client, &r, "m", "sys", b"png").unwrap(),
            CellReply::Latex("\\beta".into())
        );
        match recognize_cell_image(&client, &r, "m", "sys", b"png").unwrap() {
            CellReply::Unparseable(msg) => assert!(msg.contains("no json here"), "got: {msg}"),
            other => panic!("expected Unparseable, got {:?}", other),
        }
        assert_eq!(
            recognize_cell_image(&client, &r, "m", "sys", b"png").unwrap(),
            CellReply::Latex(String::new())
        );
    }
}
