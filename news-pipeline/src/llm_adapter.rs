use crate::config::ModelConfig;
use crate::types::{ModelError, PipelineError, Result, TokenUsage};
use crate::utils::text::excerpt;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A fully rendered prompt, ready for the model service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    /// Hundredths, so requests stay comparable byte for byte.
    pub temperature_centi: u32,
}

impl CompletionRequest {
    pub fn temperature(&self) -> f32 {
        self.temperature_centi as f32 / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Trait for model services that turn a prompt into text
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Get the name of this adapter, used in logs and reports
    fn adapter_name(&self) -> String;

    /// Run one completion. Callers own retries and deadlines.
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<Completion, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Adapter for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiAdapter {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout_seconds: u64,
}

impl OpenAiAdapter {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PipelineError::Config("model.api_key is not configured".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout_seconds: config.timeout_seconds,
        })
    }

    fn headers(&self) -> std::result::Result<HeaderMap, ModelError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| ModelError::Malformed(format!("invalid api key header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn adapter_name(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<Completion, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature(),
        };

        debug!(model = %self.model, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        seconds: self.timeout_seconds,
                    }
                } else {
                    ModelError::Http(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ModelError::RateLimited(response.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ModelError::Malformed("response has no message content".to_string()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Completion {
            text,
            usage,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

/// A canned reply for [`MockLlmAdapter`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    RateLimited,
    ServerError,
    Malformed,
}

impl MockReply {
    fn into_result(self) -> std::result::Result<String, ModelError> {
        match self {
            MockReply::Text(text) => Ok(text),
            MockReply::RateLimited => Err(ModelError::RateLimited("mock rate limit".to_string())),
            MockReply::ServerError => Err(ModelError::Status {
                status: 503,
                body: "mock outage".to_string(),
            }),
            MockReply::Malformed => Err(ModelError::Malformed("mock returned nothing".to_string())),
        }
    }
}

/// Mock adapter for development and testing.
///
/// Scripted replies are consumed in order; once they run out the adapter
/// answers with a headline plus an excerpt of the user prompt, which keeps
/// generated text grounded in whatever sources the prompt carried.
pub struct MockLlmAdapter {
    name: String,
    response_delay_ms: u64,
    script: Mutex<VecDeque<MockReply>>,
    failing_markers: Vec<String>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl MockLlmAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_delay_ms: 0,
            script: Mutex::new(VecDeque::new()),
            failing_markers: Vec::new(),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    pub fn with_replies(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.script.get_mut().extend(replies);
        self
    }

    /// Every request whose user prompt contains `marker` fails with a 503.
    pub fn failing_when(mut self, marker: impl Into<String>) -> Self {
        self.failing_markers.push(marker.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    fn fallback_reply(request: &CompletionRequest) -> String {
        let headline = request
            .user
            .lines()
            .find_map(|line| line.strip_prefix("Topic: ").or_else(|| line.strip_prefix("Article title: ")))
            .unwrap_or("Briefing")
            .trim();
        format!("# {} update\n\n{}", headline, excerpt(&request.user, 600))
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    fn adapter_name(&self) -> String {
        format!("mock:{}", self.name)
    }

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<Completion, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }

        if self.failing_markers.iter().any(|marker| request.user.contains(marker.as_str())) {
            return Err(ModelError::Status {
                status: 503,
                body: "mock outage".to_string(),
            });
        }

        let scripted = self.script.lock().await.pop_front();
        let text = match scripted {
            Some(reply) => reply.into_result()?,
            None => Self::fallback_reply(request),
        };

        let usage = TokenUsage {
            prompt_tokens: (request.system.split_whitespace().count() + request.user.split_whitespace().count())
                as u32,
            completion_tokens: text.split_whitespace().count() as u32,
        };
        Ok(Completion {
            text,
            usage,
            model: self.adapter_name(),
        })
    }
}

/// Build the adapter named by `config.provider`.
pub fn create_adapter(config: &ModelConfig) -> Result<Arc<dyn LlmAdapter>> {
    let adapter: Arc<dyn LlmAdapter> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAiAdapter::new(config)?),
        "mock" => Arc::new(MockLlmAdapter::new(config.model.clone())),
        other => return Err(ModelError::Unsupported(other.to_string()).into()),
    };
    info!("Using model adapter {}", adapter.adapter_name());
    Ok(adapter)
}
