// Streaming chat clients for the advisory panel.
//
// Each provider turns a `ChatRequest` into a stream of `LlmEvent`s sent over
// an mpsc channel. Ollama streams newline-delimited JSON; OpenAI and
// Anthropic stream Server-Sent Events via reqwest-eventsource. Every stream
// ends with exactly one `Complete` or `Error` event unless the receiver is
// dropped first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dugout_core::config::AiProvider;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event::{ChatRequest, LlmEvent};
use crate::settings::AiSettings;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const OPENAI_API_BASE: &str = "https://api.openai.com";
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Provider(String),

    #[error("The AI provider returned an empty response")]
    EmptyResponse,

    #[error("invalid AI setting '{field}': {message}")]
    InvalidSettings { field: String, message: String },
}

// ---------------------------------------------------------------------------
// ChatProvider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Model used when the request does not name one.
    fn model(&self) -> &str;

    /// Stream a chat completion as `LlmEvent`s over `tx`.
    ///
    /// Failures reaching the provider are reported as `LlmEvent::Error`, not
    /// as an `Err`. The method returns when the stream is finished or the
    /// receiver is dropped.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()>;

    async fn check_connection(&self) -> bool;

    async fn list_models(&self) -> Vec<String> {
        Vec::new()
    }
}

fn http_client(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!("failed to build configured HTTP client, using defaults: {e}");
            reqwest::Client::new()
        })
}

async fn send_error(tx: &mpsc::Sender<LlmEvent>, message: String, generation: u64) {
    let _ = tx.send(LlmEvent::Error { message, generation }).await;
}

/// Send the terminal event for a stream that produced `full_text`.
async fn finish(tx: &mpsc::Sender<LlmEvent>, provider: &str, full_text: String, generation: u64) {
    if full_text.is_empty() {
        send_error(tx, format!("{provider} returned an empty response"), generation).await;
    } else {
        let _ = tx
            .send(LlmEvent::Complete {
                full_text,
                generation,
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaProvider {
    http: reqwest::Client,
    base_url: String,
    model: String,
    preferred_model: String,
}

enum Attempt {
    Finished,
    ModelNotFound(String),
    ReceiverGone,
}

impl OllamaProvider {
    pub fn new(base_url: &str, preferred_model: &str, connect_timeout: Duration) -> Self {
        Self {
            http: http_client(connect_timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: preferred_model.to_string(),
            preferred_model: preferred_model.to_string(),
        }
    }

    /// One `/api/chat` call against a single model. Text is appended to
    /// `full_text` and forwarded as tokens as it arrives.
    async fn stream_model(
        &self,
        model: &str,
        request: &ChatRequest,
        tx: &mpsc::Sender<LlmEvent>,
        generation: u64,
        full_text: &mut String,
    ) -> anyhow::Result<Attempt> {
        let body = serde_json::json!({
            "model": model,
            "messages": request.messages_with_system(),
            "stream": true,
            "options": { "num_predict": request.max_tokens },
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message =
                extract_error_message(&body, &format!("Ollama request failed with status {status}"));
            if is_model_not_found(&message) {
                return Ok(Attempt::ModelNotFound(message));
            }
            anyhow::bail!(message);
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Ollama stream interrupted")?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match self.handle_line(&line, tx, generation, full_text).await? {
                    Some(attempt) => return Ok(attempt),
                    None => continue,
                }
            }
        }

        // Trailing line without a newline.
        let rest = String::from_utf8_lossy(&buffer).into_owned();
        if let Some(attempt) = self.handle_line(&rest, tx, generation, full_text).await? {
            return Ok(attempt);
        }
        Ok(Attempt::Finished)
    }

    async fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::Sender<LlmEvent>,
        generation: u64,
        full_text: &mut String,
    ) -> anyhow::Result<Option<Attempt>> {
        let Some(chunk) = parse_ollama_line(line) else {
            return Ok(None);
        };
        if let Some(error) = chunk.error {
            if full_text.is_empty() && is_model_not_found(&error) {
                return Ok(Some(Attempt::ModelNotFound(error)));
            }
            anyhow::bail!(error);
        }
        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
            full_text.push_str(&text);
            if tx.send(LlmEvent::Token { text, generation }).await.is_err() {
                return Ok(Some(Attempt::ReceiverGone));
            }
        }
        if chunk.done {
            return Ok(Some(Attempt::Finished));
        }
        Ok(None)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        let requested = request.model.as_deref().unwrap_or(&self.model);
        let mut last_error = "Ollama returned an empty response".to_string();

        for model in candidate_models(requested, &self.preferred_model) {
            let mut full_text = String::new();
            match self
                .stream_model(&model, request, &tx, generation, &mut full_text)
                .await
            {
                Ok(Attempt::Finished) if full_text.is_empty() => {
                    debug!(%model, "Ollama model returned no content, trying next candidate");
                }
                Ok(Attempt::Finished) => {
                    finish(&tx, self.name(), full_text, generation).await;
                    return Ok(());
                }
                Ok(Attempt::ModelNotFound(message)) => {
                    warn!(%model, "Ollama model unavailable, trying next candidate");
                    last_error = message;
                }
                Ok(Attempt::ReceiverGone) => return Ok(()),
                Err(e) => {
                    warn!("Ollama streaming error: {e:#}");
                    send_error(&tx, format!("{e:#}"), generation).await;
                    return Ok(());
                }
            }
        }

        send_error(&tx, last_error, generation).await;
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        match self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(CONNECTION_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama not reachable: {e}");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<String> {
        let response = match self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(CONNECTION_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            _ => return Vec::new(),
        };
        match response.json::<Value>().await {
            Ok(body) => parse_model_names(&body),
            Err(e) => {
                warn!("failed to decode Ollama model list: {e}");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, connect_timeout: Duration) -> Self {
        Self::with_base_url(OPENAI_API_BASE, api_key, model, connect_timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: String,
        model: String,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            http: http_client(connect_timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages_with_system(),
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        let builder = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let es = match builder.eventsource() {
            Ok(es) => es,
            Err(e) => {
                send_error(&tx, format!("Failed to create event source: {e}"), generation).await;
                return Ok(());
            }
        };
        pump_event_source(es, self.name(), &tx, generation, classify_openai).await;
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, connect_timeout: Duration) -> Self {
        Self::with_base_url(ANTHROPIC_API_BASE, api_key, model, connect_timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: String,
        model: String,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            http: http_client(connect_timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        // System prompt goes top-level, not in the message list.
        let mut body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "max_tokens": request.max_tokens,
            "stream": true,
            "messages": request.messages,
        });
        if !request.system.is_empty() {
            body["system"] = Value::String(request.system.clone());
        }

        let builder = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let es = match builder.eventsource() {
            Ok(es) => es,
            Err(e) => {
                send_error(&tx, format!("Failed to create event source: {e}"), generation).await;
                return Ok(());
            }
        };
        pump_event_source(es, self.name(), &tx, generation, classify_anthropic).await;
        Ok(())
    }

    async fn check_connection(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SSE driver
// ---------------------------------------------------------------------------

/// What a single SSE message means for the stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseStep {
    Text(String),
    Done,
    Fail(String),
    Skip,
}

async fn pump_event_source(
    mut es: EventSource,
    provider: &'static str,
    tx: &mpsc::Sender<LlmEvent>,
    generation: u64,
    classify: fn(&str, &str) -> SseStep,
) {
    let mut full_text = String::new();

    while let Some(event) = es.next().await {
        match event {
            Ok(Event::Open) => {
                debug!(provider, "SSE connection opened");
            }
            Ok(Event::Message(msg)) => match classify(&msg.event, &msg.data) {
                SseStep::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    full_text.push_str(&text);
                    if tx.send(LlmEvent::Token { text, generation }).await.is_err() {
                        // Receiver dropped; abort stream.
                        es.close();
                        return;
                    }
                }
                SseStep::Done => {
                    es.close();
                    finish(tx, provider, full_text, generation).await;
                    return;
                }
                SseStep::Fail(message) => {
                    es.close();
                    send_error(tx, message, generation).await;
                    return;
                }
                SseStep::Skip => {
                    debug!(provider, event = %msg.event, "ignoring SSE event");
                }
            },
            // The server closed the stream without an explicit end marker.
            Err(reqwest_eventsource::Error::StreamEnded) => {
                es.close();
                break;
            }
            Err(err) => {
                es.close();
                warn!(provider, "SSE stream error: {err}");
                let message = describe_stream_error(provider, err).await;
                send_error(tx, message, generation).await;
                return;
            }
        }
    }

    finish(tx, provider, full_text, generation).await;
}

async fn describe_stream_error(provider: &str, err: reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            extract_error_message(&body, &format!("{provider} request failed with status {status}"))
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error reaching {provider}: {e}")
        }
        other => format!("{provider} stream error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Stream parsing helpers
// ---------------------------------------------------------------------------

/// One line of an Ollama `/api/chat` stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct OllamaChunk {
    pub content: Option<String>,
    pub done: bool,
    pub error: Option<String>,
}

/// Parse one NDJSON line. Blank and malformed lines yield `None`.
///
/// Expected shape: `{ "message": { "content": "..." }, "done": false }` or
/// `{ "error": "..." }`.
pub(crate) fn parse_ollama_line(line: &str) -> Option<OllamaChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let v: Value = serde_json::from_str(line).ok()?;
    let error = match v.get("error") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    Some(OllamaChunk {
        content: v
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string),
        done: v.get("done").and_then(Value::as_bool).unwrap_or(false),
        error,
    })
}

/// Classify an OpenAI chat-completions SSE payload.
///
/// Expected shape: `{ "choices": [ { "delta": { "content": "..." } } ] }`,
/// terminated by the literal `[DONE]`.
pub(crate) fn classify_openai(_event: &str, data: &str) -> SseStep {
    let data = data.trim();
    if data == "[DONE]" {
        return SseStep::Done;
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return SseStep::Skip;
    };
    if v.get("error").is_some_and(|e| !e.is_null()) {
        return SseStep::Fail(extract_error_message(data, "OpenAI returned an error"));
    }
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .map(|s| SseStep::Text(s.to_string()))
        .unwrap_or(SseStep::Skip)
}

pub(crate) fn classify_anthropic(event: &str, data: &str) -> SseStep {
    match event {
        "content_block_delta" => parse_delta_text(data)
            .map(SseStep::Text)
            .unwrap_or(SseStep::Skip),
        "message_stop" => SseStep::Done,
        "error" => SseStep::Fail(extract_error_message(data, "Anthropic returned an error")),
        _ => SseStep::Skip,
    }
}

/// Extract `delta.text` from a `content_block_delta` event's JSON.
///
/// Expected shape: `{ "type": "content_block_delta", "delta": { "type": "text_delta", "text": "..." } }`
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

/// Pull a readable message out of a provider error body.
///
/// Looks for a non-empty string under `error`, `message` or `detail`
/// (descending into nested objects), else returns the trimmed body, else
/// `default`.
pub fn extract_error_message(payload: &str, default: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return default.to_string();
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = error_text(&value) {
            return message;
        }
    }
    trimmed.to_string()
}

fn error_text(value: &Value) -> Option<String> {
    for key in ["error", "message", "detail"] {
        match value.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(nested @ Value::Object(_)) => {
                if let Some(found) = error_text(nested) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn is_model_not_found(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("model") && lowered.contains("not found")
}

/// Ollama models to try in order: the requested model, its `:latest`
/// form, then the preferred model and its `:latest` form. No duplicates.
pub fn candidate_models(requested: &str, preferred: &str) -> Vec<String> {
    let with_latest = |m: &str| (!m.is_empty() && !m.contains(':')).then(|| format!("{m}:latest"));
    let mut out: Vec<String> = Vec::new();
    let candidates = [
        Some(requested.to_string()),
        with_latest(requested),
        Some(preferred.to_string()),
        with_latest(preferred),
    ];
    for candidate in candidates.into_iter().flatten() {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn parse_model_names(body: &Value) -> Vec<String> {
    body.get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// AdvisoryClient wrapper
// ---------------------------------------------------------------------------

/// The configured provider, or the reason advice is unavailable.
#[derive(Clone)]
pub enum AdvisoryClient {
    Active(Arc<dyn ChatProvider>),
    Disabled(String),
}

impl AdvisoryClient {
    /// Build a client for the selected provider. A cloud provider without an
    /// API key yields `Disabled`.
    pub fn from_settings(settings: &AiSettings, connect_timeout: Duration) -> Self {
        let model = settings.preferred_model.clone();
        let client = match settings.provider {
            AiProvider::Ollama => AdvisoryClient::Active(Arc::new(OllamaProvider::new(
                &settings.ollama_url,
                &model,
                connect_timeout,
            ))),
            AiProvider::OpenAi => match settings.resolved_openai_key() {
                Some(key) => AdvisoryClient::Active(Arc::new(OpenAiProvider::new(
                    key,
                    model,
                    connect_timeout,
                ))),
                None => AdvisoryClient::Disabled("Missing OpenAI API Key".to_string()),
            },
            AiProvider::Anthropic => match settings.resolved_anthropic_key() {
                Some(key) => AdvisoryClient::Active(Arc::new(AnthropicProvider::new(
                    key,
                    model,
                    connect_timeout,
                ))),
                None => AdvisoryClient::Disabled("Missing Anthropic API Key".to_string()),
            },
        };
        info!(provider = %settings.provider, active = client.is_active(), "advisory client configured");
        client
    }

    pub fn with_provider(provider: Arc<dyn ChatProvider>) -> Self {
        AdvisoryClient::Active(provider)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AdvisoryClient::Active(_))
    }

    pub fn provider_name(&self) -> Option<&'static str> {
        match self {
            AdvisoryClient::Active(p) => Some(p.name()),
            AdvisoryClient::Disabled(_) => None,
        }
    }

    /// Stream a request, or immediately send an error if disabled.
    pub async fn stream(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        match self {
            AdvisoryClient::Active(provider) => {
                provider.stream_chat(request, tx, generation).await
            }
            AdvisoryClient::Disabled(reason) => {
                send_error(&tx, reason.clone(), generation).await;
                Ok(())
            }
        }
    }

    /// Run `stream` on a background task.
    pub fn spawn_stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.stream(&request, tx, generation).await {
                warn!("advisory stream failed: {e:#}");
            }
        })
    }

    /// Collect a whole response. Blank output is an error.
    pub async fn complete(&self, request: ChatRequest) -> Result<String, AdvisoryError> {
        if let AdvisoryClient::Disabled(reason) = self {
            return Err(AdvisoryError::Unavailable(reason.clone()));
        }

        let (tx, mut rx) = mpsc::channel(64);
        let task = self.spawn_stream(request, tx, 0);

        let mut outcome = Err(AdvisoryError::Provider(
            "The AI stream ended without a response".to_string(),
        ));
        while let Some(event) = rx.recv().await {
            match event {
                LlmEvent::Token { .. } => {}
                LlmEvent::Complete { full_text, .. } => {
                    outcome = if full_text.trim().is_empty() {
                        Err(AdvisoryError::EmptyResponse)
                    } else {
                        Ok(full_text)
                    };
                    break;
                }
                LlmEvent::Error { message, .. } => {
                    outcome = Err(AdvisoryError::Provider(message));
                    break;
                }
            }
        }
        drop(rx);
        let _ = task.await;
        outcome
    }

    pub async fn check_connection(&self) -> bool {
        match self {
            AdvisoryClient::Active(provider) => provider.check_connection().await,
            AdvisoryClient::Disabled(_) => false,
        }
    }

    pub async fn list_models(&self) -> Vec<String> {
        match self {
            AdvisoryClient::Active(provider) => provider.list_models().await,
            AdvisoryClient::Disabled(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChatMessage;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // -- Parsing helpers --

    #[test]
    fn parse_ollama_content_line() {
        let chunk = parse_ollama_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert!(!chunk.done);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn parse_ollama_done_and_error_lines() {
        let done = parse_ollama_line(r#"{"message":{"content":""},"done":true}"#).unwrap();
        assert!(done.done);

        let err = parse_ollama_line(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("model 'x' not found"));

        assert!(parse_ollama_line("   ").is_none());
        assert!(parse_ollama_line("{broken").is_none());
    }

    #[test]
    fn classify_openai_chunks() {
        let data = r#"{"choices":[{"index":0,"delta":{"content":"Bat"}}]}"#;
        assert_eq!(classify_openai("message", data), SseStep::Text("Bat".into()));
        assert_eq!(classify_openai("message", " [DONE] "), SseStep::Done);
        assert_eq!(
            classify_openai("message", r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseStep::Skip
        );
        assert_eq!(
            classify_openai("message", r#"{"error":{"message":"Rate limited"}}"#),
            SseStep::Fail("Rate limited".into())
        );
    }

    #[test]
    fn classify_anthropic_events() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hey"}}"#;
        assert_eq!(classify_anthropic("content_block_delta", delta), SseStep::Text("Hey".into()));
        assert_eq!(classify_anthropic("message_stop", "{}"), SseStep::Done);
        assert_eq!(classify_anthropic("ping", "{}"), SseStep::Skip);
        assert_eq!(
            classify_anthropic(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            ),
            SseStep::Fail("Overloaded".into())
        );
    }

    #[test]
    fn parse_delta_text_missing_or_invalid() {
        assert_eq!(parse_delta_text(r#"{"type":"content_block_delta"}"#), None);
        assert_eq!(parse_delta_text("{broken"), None);
    }

    #[test]
    fn error_message_extraction() {
        assert_eq!(extract_error_message("", "fallback"), "fallback");
        assert_eq!(extract_error_message(r#"{"error":" boom "}"#, "x"), "boom");
        assert_eq!(extract_error_message(r#"{"detail":"bad"}"#, "x"), "bad");
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"Invalid API key"}}"#, "x"),
            "Invalid API key"
        );
        assert_eq!(extract_error_message(r#"{"error":{"type":"t"}}"#, "x"), r#"{"error":{"type":"t"}}"#);
        assert_eq!(extract_error_message("  plain text  ", "x"), "plain text");
    }

    #[test]
    fn model_not_found_detection() {
        assert!(is_model_not_found("model \"llama3\" not found, try pulling it first"));
        assert!(is_model_not_found("Model Not Found"));
        assert!(!is_model_not_found("file not found"));
        assert!(!is_model_not_found("model is loading"));
    }

    #[test]
    fn candidate_models_order_and_dedup() {
        assert_eq!(
            candidate_models("coach", "dugout-coach"),
            vec!["coach", "coach:latest", "dugout-coach", "dugout-coach:latest"]
        );
        assert_eq!(
            candidate_models("dugout-coach:latest", "dugout-coach:latest"),
            vec!["dugout-coach:latest"]
        );
        assert_eq!(candidate_models("llama3:8b", "llama3:8b"), vec!["llama3:8b"]);
    }

    #[test]
    fn model_names_from_tags() {
        let body = serde_json::json!({"models":[{"name":"llama3:latest"},{"name":"dugout-coach:latest"}]});
        assert_eq!(parse_model_names(&body), vec!["llama3:latest", "dugout-coach:latest"]);
        assert!(parse_model_names(&serde_json::json!({})).is_empty());
    }

    // -- AdvisoryClient --

    fn request() -> ChatRequest {
        ChatRequest {
            system: "You are a coaching assistant.".into(),
            messages: vec![ChatMessage::user("Who should lead off?")],
            model: None,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn disabled_client_sends_error_event() {
        let client = AdvisoryClient::Disabled("Missing OpenAI API Key".into());
        let (tx, mut rx) = mpsc::channel(8);

        client.stream(&request(), tx, 1).await.expect("should not fail");

        let event = rx.recv().await.expect("should receive an event");
        assert_eq!(
            event,
            LlmEvent::Error {
                message: "Missing OpenAI API Key".to_string(),
                generation: 1,
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!client.check_connection().await);
    }

    #[tokio::test]
    async fn disabled_client_complete_is_unavailable() {
        let client = AdvisoryClient::Disabled("Missing Anthropic API Key".into());
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, AdvisoryError::Unavailable(_)));
        assert_eq!(err.to_string(), "Missing Anthropic API Key");
    }

    #[test]
    fn from_settings_with_key_is_active() {
        let settings = AiSettings {
            provider: AiProvider::Anthropic,
            ollama_url: "http://localhost:11434".into(),
            preferred_model: "claude-3-5-sonnet-latest".into(),
            openai_key: None,
            anthropic_key: Some("sk-ant-test".into()),
        };
        let client = AdvisoryClient::from_settings(&settings, Duration::from_secs(5));
        assert_eq!(client.provider_name(), Some("Anthropic"));

        let ollama = AiSettings {
            provider: AiProvider::Ollama,
            ..settings
        };
        assert!(AdvisoryClient::from_settings(&ollama, Duration::from_secs(5)).is_active());
    }

    #[test]
    fn from_settings_without_key_is_disabled() {
        if std::env::var(crate::settings::OPENAI_KEY_ENV).is_ok() {
            return;
        }
        let settings = AiSettings {
            provider: AiProvider::OpenAi,
            ollama_url: "http://localhost:11434".into(),
            preferred_model: "gpt-4o".into(),
            openai_key: None,
            anthropic_key: None,
        };
        let client = AdvisoryClient::from_settings(&settings, Duration::from_secs(5));
        assert!(matches!(client, AdvisoryClient::Disabled(ref m) if m == "Missing OpenAI API Key"));
    }

    // -- Mock HTTP server --

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Read one full HTTP request (headers plus Content-Length body).
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve one canned response per connection, returning the requests seen.
    async fn serve(responses: Vec<String>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut socket).await);
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                // Keep connection alive briefly so the client can read everything.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            seen
        });
        (addr, task)
    }

    fn streaming_response(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n{body}"
        )
    }

    fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    async fn collect(provider: &dyn ChatProvider, generation: u64) -> Vec<LlmEvent> {
        let (tx, mut rx) = mpsc::channel(32);
        provider.stream_chat(&request(), tx, generation).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn ollama_streams_ndjson_tokens() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Lead off\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" with speed\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let (addr, server) = serve(vec![streaming_response("application/x-ndjson", body)]).await;

        let provider = OllamaProvider::new(
            &format!("http://{addr}"),
            "dugout-coach:latest",
            Duration::from_secs(5),
        );
        let events = collect(&provider, 3).await;
        let requests = server.await.unwrap();

        assert_eq!(
            events,
            vec![
                LlmEvent::Token { text: "Lead off".into(), generation: 3 },
                LlmEvent::Token { text: " with speed".into(), generation: 3 },
                LlmEvent::Complete { full_text: "Lead off with speed".into(), generation: 3 },
            ]
        );
        assert!(requests[0].starts_with("POST /api/chat"));
        assert!(requests[0].contains("\"role\":\"system\""));
    }

    #[tokio::test]
    async fn ollama_falls_back_when_model_missing() {
        let missing = json_response(
            "404 Not Found",
            r#"{"error":"model \"dugout-coach\" not found, try pulling it first"}"#,
        );
        let ok = streaming_response(
            "application/x-ndjson",
            "{\"message\":{\"content\":\"Fine\"},\"done\":true}\n",
        );
        let (addr, server) = serve(vec![missing, ok]).await;

        let provider =
            OllamaProvider::new(&format!("http://{addr}"), "dugout-coach", Duration::from_secs(5));
        let events = collect(&provider, 1).await;
        let requests = server.await.unwrap();

        assert_eq!(
            events.last(),
            Some(&LlmEvent::Complete { full_text: "Fine".into(), generation: 1 })
        );
        assert!(requests[0].contains("\"model\":\"dugout-coach\""));
        assert!(requests[1].contains("\"model\":\"dugout-coach:latest\""));
    }

    #[tokio::test]
    async fn ollama_error_status_is_reported() {
        let (addr, server) =
            serve(vec![json_response("500 Internal Server Error", r#"{"error":"out of memory"}"#)])
                .await;

        let provider = OllamaProvider::new(
            &format!("http://{addr}"),
            "dugout-coach:latest",
            Duration::from_secs(5),
        );
        let events = collect(&provider, 9).await;
        let _ = server.await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            LlmEvent::Error { message, generation } => {
                assert_eq!(*generation, 9);
                assert!(message.contains("out of memory"), "unexpected message: {message}");
            }
            other => panic!("Expected LlmEvent::Error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ollama_unreachable_is_an_error_event() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let provider = OllamaProvider::new(
            &format!("http://{addr}"),
            "dugout-coach:latest",
            Duration::from_secs(2),
        );
        let events = collect(&provider, 2).await;
        assert!(matches!(
            &events[..],
            [LlmEvent::Error { message, generation: 2 }] if message.contains("Failed to reach Ollama")
        ));
        assert!(!provider.check_connection().await);
    }

    #[tokio::test]
    async fn openai_streams_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\r\n",
            "\r\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Bat\"}}]}\r\n",
            "\r\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" Rivera third\"}}]}\r\n",
            "\r\n",
            "data: [DONE]\r\n",
            "\r\n",
        );
        let (addr, server) = serve(vec![streaming_response("text/event-stream", body)]).await;

        let provider = OpenAiProvider::with_base_url(
            &format!("http://{addr}"),
            "sk-test".into(),
            "gpt-4o".into(),
            Duration::from_secs(5),
        );
        let events = collect(&provider, 4).await;
        let requests = server.await.unwrap();

        assert_eq!(
            events,
            vec![
                LlmEvent::Token { text: "Bat".into(), generation: 4 },
                LlmEvent::Token { text: " Rivera third".into(), generation: 4 },
                LlmEvent::Complete { full_text: "Bat Rivera third".into(), generation: 4 },
            ]
        );
        assert!(requests[0].starts_with("POST /v1/chat/completions"));
        assert!(requests[0].to_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn anthropic_mock_sse_full_flow() {
        let body = concat!(
            "event: message_start\r\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":15}}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Lineup\"}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" notes\"}}\r\n",
            "\r\n",
            "event: message_stop\r\n",
            "data: {\"type\":\"message_stop\"}\r\n",
            "\r\n",
        );
        let (addr, server) = serve(vec![streaming_response("text/event-stream", body)]).await;

        let provider = AnthropicProvider::with_base_url(
            &format!("http://{addr}"),
            "sk-ant-test".into(),
            "claude-test".into(),
            Duration::from_secs(5),
        );
        let events = collect(&provider, 7).await;
        let requests = server.await.unwrap();

        assert_eq!(events.len(), 3, "expected 2 tokens + 1 complete");
        assert_eq!(
            events[2],
            LlmEvent::Complete { full_text: "Lineup notes".into(), generation: 7 }
        );
        let req = &requests[0];
        assert!(req.starts_with("POST /v1/messages"));
        assert!(req.contains("anthropic-version: 2023-06-01"));
        assert!(req.contains("\"system\":\"You are a coaching assistant.\""));
        assert!(!req.contains("\"role\":\"system\""));
    }

    #[tokio::test]
    async fn anthropic_error_status_uses_body_message() {
        let (addr, server) = serve(vec![json_response(
            "401 Unauthorized",
            r#"{"type":"error","error":{"type":"authentication_error","message":"Invalid API key"}}"#,
        )])
        .await;

        let provider = AnthropicProvider::with_base_url(
            &format!("http://{addr}"),
            "bad".into(),
            "claude-test".into(),
            Duration::from_secs(5),
        );
        let events = collect(&provider, 5).await;
        let _ = server.await;

        assert_eq!(
            events,
            vec![LlmEvent::Error { message: "Invalid API key".into(), generation: 5 }]
        );
    }

    // -- complete() over a scripted provider --

    struct Scripted(Vec<LlmEvent>);

    #[async_trait]
    impl ChatProvider for Scripted {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream_chat(
            &self,
            _request: &ChatRequest,
            tx: mpsc::Sender<LlmEvent>,
            _generation: u64,
        ) -> anyhow::Result<()> {
            for event in self.0.clone() {
                let _ = tx.send(event).await;
            }
            Ok(())
        }

        async fn check_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn complete_collects_full_text() {
        let client = AdvisoryClient::with_provider(Arc::new(Scripted(vec![
            LlmEvent::Token { text: "a".into(), generation: 0 },
            LlmEvent::Complete { full_text: "a".into(), generation: 0 },
        ])));
        assert_eq!(client.complete(request()).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn complete_reports_empty_and_errors() {
        let empty = AdvisoryClient::with_provider(Arc::new(Scripted(vec![LlmEvent::Complete {
            full_text: "  ".into(),
            generation: 0,
        }])));
        assert!(matches!(empty.complete(request()).await, Err(AdvisoryError::EmptyResponse)));

        let failing = AdvisoryClient::with_provider(Arc::new(Scripted(vec![LlmEvent::Error {
            message: "boom".into(),
            generation: 0,
        }])));
        let err = failing.complete(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let silent = AdvisoryClient::with_provider(Arc::new(Scripted(vec![])));
        assert!(matches!(silent.complete(request()).await, Err(AdvisoryError::Provider(_))));
    }
}
