//! Streaming client for an OpenAI-compatible chat-completion endpoint, with
//! per-provider parameter negotiation, error-driven retry, and an
//! exponential-moving-average token-usage predictor.
//!
//! Two layers, mirroring two call sites the system this crate is grounded on
//! keeps separate: [`LlmClient::chat`] is the low-level entry point with all
//! the negotiation/retry machinery, and [`LlmClient::stream_generate`] is a
//! thin convenience wrapper that picks a model from an [`AnswerMode`] and
//! yields plain text deltas.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use shared_protocol::AnswerMode;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

/// Observes retry/error events from the chat-completion retry loop, so a
/// caller can wire these into its own metrics without this crate depending
/// on any particular metrics stack. Both methods no-op by default.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self) {}
    fn on_error(&self) {}
}

pub struct NoopObserver;
impl RetryObserver for NoopObserver {}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
pub const DEFAULT_SEED_TOKEN_USAGE: f64 = 1500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_brief: String,
    pub model_full: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub max_concurrent: usize,
}

impl LlmConfig {
    fn model_for(&self, mode: AnswerMode) -> String {
        match mode {
            AnswerMode::Brief => self.model_brief.clone(),
            AnswerMode::Full => self.model_full.clone(),
        }
    }
}

/// One piece of a chat completion: either a text delta, or the terminal
/// chunk (`done`, possibly carrying `error`).
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub content: String,
    pub done: bool,
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    StreamUnsupported,
    TemperatureUnsupported,
    MaxTokensUnsupported,
    LengthLimit,
    Network,
    Unknown,
}

/// Classifies a failed request from its HTTP status and body text. Real
/// providers don't agree on an error schema, so this matches on substrings
/// the way the client this was ported from does.
fn classify_error(status: Option<u16>, body: &str) -> ErrorKind {
    let lower = body.to_lowercase();
    if lower.contains("stream")
        && (lower.contains("unsupported")
            || lower.contains("verified")
            || lower.contains("organization")
            || lower.contains("unsupported_value"))
    {
        return ErrorKind::StreamUnsupported;
    }
    if lower.contains("temperature")
        && (lower.contains("only the default") || lower.contains("unsupported value"))
    {
        return ErrorKind::TemperatureUnsupported;
    }
    if (lower.contains("max_tokens") || lower.contains("max_completion_tokens"))
        && (lower.contains("unsupported") || lower.contains("not supported"))
    {
        return ErrorKind::MaxTokensUnsupported;
    }
    if lower.contains("length") || lower.contains("finish_reason") {
        return ErrorKind::LengthLimit;
    }
    if lower.contains("connection") || lower.contains("timeout") || lower.contains("network") {
        return ErrorKind::Network;
    }
    match status {
        Some(s) if s >= 500 => ErrorKind::Network,
        _ => ErrorKind::Unknown,
    }
}

fn wants_max_completion_tokens(model: &str, base_url: &str) -> bool {
    let m = model.to_lowercase();
    let b = base_url.to_lowercase();
    m.contains("claude") || b.contains("anthropic") || m.contains("gpt-5") || m.contains("gpt-4o")
}

fn wants_default_temperature(model: &str) -> bool {
    let m = model.to_lowercase();
    m.contains("gpt-5") || m.contains("gpt-4o")
}

/// Mutable request state threaded through the retry loop: which token-limit
/// field is in play, whether streaming is still requested, and the current
/// limit/temperature.
struct RequestState {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    use_max_completion_tokens: bool,
    include_temperature: bool,
    temperature: f32,
    token_limit: u32,
}

impl RequestState {
    fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("model".into(), serde_json::json!(self.model));
        obj.insert("messages".into(), serde_json::to_value(&self.messages).unwrap());
        obj.insert("stream".into(), serde_json::json!(self.stream));
        if self.use_max_completion_tokens {
            obj.insert("max_completion_tokens".into(), serde_json::json!(self.token_limit));
        } else {
            obj.insert("max_tokens".into(), serde_json::json!(self.token_limit));
        }
        if self.include_temperature {
            obj.insert("temperature".into(), serde_json::json!(self.temperature));
        }
        serde_json::Value::Object(obj)
    }
}

/// Grows the token limit after a length-truncated response: the flat 4000
/// ceiling for limits that were already generous mirrors the original's
/// "don't bother doubling, just jump" rule.
fn grow_token_limit(current: u32, reasoning_tokens: u32) -> u32 {
    let mut new_limit = if reasoning_tokens > 0 {
        (current.saturating_mul(3)).max(2000)
    } else {
        (current.saturating_mul(2)).min(2000)
    };
    if current >= 1000 {
        new_limit = 4000;
    }
    new_limit
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsageField>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NonStreamEnvelope {
    choices: Vec<NonStreamChoice>,
    #[serde(default)]
    usage: Option<UsageField>,
}

#[derive(Debug, Deserialize)]
struct NonStreamChoice {
    message: NonStreamMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NonStreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageField {
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

/// OpenAI-compatible streaming chat client. Cheap to clone: the `reqwest`
/// client, concurrency semaphore, and token-usage table are all shared.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: Arc<LlmConfig>,
    semaphore: Arc<Semaphore>,
    token_usage_avg: Arc<Mutex<HashMap<String, f64>>>,
    observer: Arc<dyn RetryObserver>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("building the reqwest client should not fail with static config");
        Self {
            http,
            config: Arc::new(config),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            token_usage_avg: Arc::new(Mutex::new(HashMap::new())),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attaches a retry/error observer, e.g. a caller's metrics counters.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    async fn seeded_token_limit(&self, model: &str) -> u32 {
        let avg = *self
            .token_usage_avg
            .lock()
            .await
            .get(model)
            .unwrap_or(&DEFAULT_SEED_TOKEN_USAGE);
        let base = self.config.max_tokens;
        if avg > base as f64 * 0.8 {
            (avg * 1.5) as u32
        } else {
            base
        }
    }

    /// Low-level entry point: sends a chat completion, retrying through
    /// provider-specific parameter rejections and transient network errors,
    /// and streams back content deltas on a bounded channel. The channel
    /// closes after a terminal `Chunk { done: true, .. }`.
    pub async fn chat(
        &self,
        model: String,
        messages: Vec<Message>,
        stream: bool,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> ReceiverStream<Chunk> {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);

        if !self.is_configured() {
            let _ = tx
                .send(Chunk {
                    content: "LLM API key not configured".into(),
                    done: true,
                    error: true,
                })
                .await;
            return ReceiverStream::new(rx);
        }

        let http = self.http.clone();
        let config = self.config.clone();
        let token_usage_avg = self.token_usage_avg.clone();
        let semaphore = self.semaphore.clone();
        let observer = self.observer.clone();
        let seeded_limit = self.seeded_token_limit(&model).await;

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let state = RequestState {
                use_max_completion_tokens: wants_max_completion_tokens(&model, &config.base_url),
                include_temperature: !wants_default_temperature(&model),
                temperature: temperature.unwrap_or(config.temperature),
                token_limit: max_tokens.unwrap_or(seeded_limit),
                stream,
                model,
                messages,
            };

            run_with_retry(&http, &config, &token_usage_avg, observer.as_ref(), state, tx).await;
        });

        ReceiverStream::new(rx)
    }

    /// High-level convenience wrapper: picks a model by [`AnswerMode`], wraps
    /// `prompt` as a single user message, and yields only the text deltas.
    /// Matches the narrower, actually-wired call shape a fuller negotiating
    /// client is used through elsewhere in this system.
    pub async fn stream_generate(&self, prompt: String, mode: AnswerMode) -> ReceiverStream<String> {
        let model = self.config.model_for(mode);
        let mut inner = self.chat(model, vec![Message::user(prompt)], true, None, None).await;

        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(chunk) = inner.next().await {
                if chunk.error {
                    tracing::error!(content = %chunk.content, "llm stream_generate failed");
                    break;
                }
                if !chunk.content.is_empty() && tx.send(chunk.content).await.is_err() {
                    break;
                }
                if chunk.done {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

async fn run_with_retry(
    http: &reqwest::Client,
    config: &LlmConfig,
    token_usage_avg: &Mutex<HashMap<String, f64>>,
    observer: &dyn RetryObserver,
    mut state: RequestState,
    tx: mpsc::Sender<Chunk>,
) {
    let mut retries = 0u32;
    let original_stream = state.stream;

    loop {
        let attempt = if state.stream {
            run_stream_attempt(http, config, &state, &tx).await
        } else {
            run_single_attempt(http, config, token_usage_avg, &mut state, &tx).await
        };

        match attempt {
            Ok(AttemptOutcome::Done) => return,
            Ok(AttemptOutcome::RetryWithState) => {
                retries += 1;
                observer.on_retry();
                if retries > config.max_retries {
                    break;
                }
                continue;
            }
            Err((kind, message)) => {
                if kind == ErrorKind::StreamUnsupported && original_stream && state.stream {
                    state.stream = false;
                    tracing::warn!("streaming unsupported by provider, falling back to a single response");
                    retries += 1;
                    observer.on_retry();
                    if retries > config.max_retries {
                        break;
                    }
                    continue;
                }
                if kind == ErrorKind::TemperatureUnsupported && state.include_temperature {
                    state.include_temperature = false;
                    retries += 1;
                    observer.on_retry();
                    if retries > config.max_retries {
                        break;
                    }
                    continue;
                }
                if kind == ErrorKind::MaxTokensUnsupported && !state.use_max_completion_tokens {
                    state.use_max_completion_tokens = true;
                    retries += 1;
                    observer.on_retry();
                    if retries > config.max_retries {
                        break;
                    }
                    continue;
                }
                if kind == ErrorKind::Network && retries < config.max_retries {
                    retries += 1;
                    observer.on_retry();
                    tokio::time::sleep(Duration::from_secs(2u64.saturating_pow(retries))).await;
                    tracing::warn!(retries, "network error talking to the LLM provider, retrying");
                    continue;
                }
                observer.on_error();
                let _ = tx
                    .send(Chunk { content: message, done: true, error: true })
                    .await;
                return;
            }
        }
    }

    observer.on_error();
    let _ = tx
        .send(Chunk {
            content: "giving up after exhausting retries".into(),
            done: true,
            error: true,
        })
        .await;
}

enum AttemptOutcome {
    Done,
    RetryWithState,
}

async fn run_stream_attempt(
    http: &reqwest::Client,
    config: &LlmConfig,
    state: &RequestState,
    tx: &mpsc::Sender<Chunk>,
) -> Result<AttemptOutcome, (ErrorKind, String)> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&state.to_json())
        .send()
        .await
        .map_err(|e| (ErrorKind::Network, e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err((classify_error(Some(status), &body), body));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| (ErrorKind::Network, e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(pos) = buffer.find("\n\n") {
            let event = buffer[..pos].to_string();
            buffer.drain(..pos + 2);

            for line in event.lines() {
                let Some(data) = line.strip_prefix("data: ") else { continue };
                if data == "[DONE]" {
                    continue;
                }
                let Ok(envelope) = serde_json::from_str::<StreamEnvelope>(data) else { continue };
                if let Some(choice) = envelope.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty()
                            && tx
                                .send(Chunk { content: content.clone(), done: false, error: false })
                                .await
                                .is_err()
                        {
                            return Ok(AttemptOutcome::Done);
                        }
                    }
                }
            }
        }
    }

    let _ = tx.send(Chunk { content: String::new(), done: true, error: false }).await;
    Ok(AttemptOutcome::Done)
}

async fn run_single_attempt(
    http: &reqwest::Client,
    config: &LlmConfig,
    token_usage_avg: &Mutex<HashMap<String, f64>>,
    state: &mut RequestState,
    tx: &mpsc::Sender<Chunk>,
) -> Result<AttemptOutcome, (ErrorKind, String)> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&state.to_json())
        .send()
        .await
        .map_err(|e| (ErrorKind::Network, e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err((classify_error(Some(status), &body), body));
    }

    let body = response.text().await.map_err(|e| (ErrorKind::Network, e.to_string()))?;
    let envelope: NonStreamEnvelope = serde_json::from_str(&body)
        .map_err(|e| (ErrorKind::Unknown, format!("failed to parse LLM response: {e}")))?;

    let Some(choice) = envelope.choices.first() else {
        return Err((ErrorKind::Unknown, "no choices in LLM response".into()));
    };

    if let Some(content) = &choice.message.content {
        if !content.is_empty() {
            if let Some(usage) = &envelope.usage {
                let mut table = token_usage_avg.lock().await;
                if usage.completion_tokens > 0 {
                    let old = *table.get(&state.model).unwrap_or(&DEFAULT_SEED_TOKEN_USAGE);
                    table.insert(state.model.clone(), 0.8 * old + 0.2 * usage.completion_tokens as f64);
                }
            }
            let _ = tx
                .send(Chunk { content: content.clone(), done: true, error: false })
                .await;
            return Ok(AttemptOutcome::Done);
        }
    }

    if choice.finish_reason.as_deref() == Some("length") {
        let reasoning_tokens = envelope
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens_details.as_ref())
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0);
        state.token_limit = grow_token_limit(state.token_limit, reasoning_tokens);
        tracing::debug!(new_limit = state.token_limit, "response truncated, growing token limit and retrying");
        return Ok(AttemptOutcome::RetryWithState);
    }

    Err((ErrorKind::Unknown, "LLM response had no content".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_stream_unsupported_from_body_text() {
        let kind = classify_error(
            Some(400),
            "This organization must be verified to stream this model",
        );
        assert_eq!(kind, ErrorKind::StreamUnsupported);
    }

    #[test]
    fn classifies_temperature_unsupported() {
        let kind = classify_error(Some(400), "Unsupported value: 'temperature' only the default value");
        assert_eq!(kind, ErrorKind::TemperatureUnsupported);
    }

    #[test]
    fn classifies_network_error_from_5xx_with_no_matching_text() {
        assert_eq!(classify_error(Some(503), "service unavailable"), ErrorKind::Network);
    }

    #[test]
    fn claude_and_gpt4o_models_use_max_completion_tokens() {
        assert!(wants_max_completion_tokens("claude-3-5-sonnet", "https://api.openai.com/v1"));
        assert!(wants_max_completion_tokens("gpt-4o-mini", "https://api.openai.com/v1"));
        assert!(wants_max_completion_tokens("any-model", "https://api.anthropic.com/v1"));
        assert!(!wants_max_completion_tokens("gpt-3.5-turbo", "https://api.openai.com/v1"));
    }

    #[test]
    fn gpt4o_omits_temperature() {
        assert!(wants_default_temperature("gpt-4o"));
        assert!(!wants_default_temperature("gpt-3.5-turbo"));
    }

    #[test]
    fn grow_token_limit_jumps_to_flat_ceiling_above_1000() {
        assert_eq!(grow_token_limit(1500, 0), 4000);
    }

    #[test]
    fn grow_token_limit_doubles_below_1000() {
        assert_eq!(grow_token_limit(500, 0), 1000);
    }

    #[test]
    fn grow_token_limit_favors_reasoning_floor() {
        assert_eq!(grow_token_limit(400, 50), 2000);
    }

    #[test]
    fn request_state_json_omits_temperature_when_disabled() {
        let state = RequestState {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            stream: true,
            use_max_completion_tokens: true,
            include_temperature: false,
            temperature: 0.7,
            token_limit: 2000,
        };
        let json = state.to_json();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_completion_tokens").is_some());
        assert!(json.get("max_tokens").is_none());
    }
}
