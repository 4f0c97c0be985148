//! OpenAI-compatible chat completion client.
//!
//! Requests are sent with `stream: true` and the server-sent events are decoded
//! into text deltas. When the request carries [`FileTools`], tool calls emitted
//! by the model are executed locally and their results sent back in a follow-up
//! request, until the model answers with text only.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use repowiki_core::contract::{ChatOptions, ChatRequest, ChatStream, CompletionService};
use repowiki_core::error::BoxError;
use repowiki_core::tools::FileTools;

/// Upper bound on tool round-trips within one completion.
pub const MAX_TOOL_ROUNDS: usize = 32;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// A tool call assembled from streamed fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Splits a byte stream into `data:` payloads, one per complete line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Merges tool-call fragments by their stream index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: ToolCallDelta) {
        if self.calls.len() <= delta.index {
            self.calls.resize_with(delta.index + 1, ToolCall::default);
        }
        let call = &mut self.calls[delta.index];
        if let Some(id) = delta.id {
            call.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.arguments.push_str(&arguments);
            }
        }
    }

    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .collect()
    }
}

struct Round {
    text: String,
    calls: Vec<ToolCall>,
}

type Sender = mpsc::UnboundedSender<Result<String, BoxError>>;

impl OpenAiClient {
    /// Client with the default timeouts.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, BoxError> {
        Self::with_timeouts(endpoint, api_key, CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// `read_timeout` bounds the wait for each chunk, so a stalled stream
    /// fails and the caller's retry takes over.
    pub fn with_timeouts(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, BoxError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| {
                error!(error = ?e, "Failed to build HTTP client");
                e
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn body(messages: &[Value], options: &ChatOptions, with_tools: bool) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = options.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if with_tools {
            body["tools"] = FileTools::definitions();
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, BoxError> {
        let url = self.url();
        let started = Instant::now();
        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(error = ?e, method = "POST", url = %url, "Completion request failed");
                return Err(e.into());
            }
        };
        let status = response.status();
        info!(
            method = "POST",
            url = %url,
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[LLM] Completion request"
        );
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            error!(status = %status, url = %url, "Completion endpoint returned error. Response body: {text}");
            return Err(format!("completion endpoint returned {status}: {text}").into());
        }
        Ok(response)
    }

    /// Read one streamed response, forwarding text deltas as they arrive.
    async fn read_round(response: reqwest::Response, tx: &Sender) -> Result<Round, BoxError> {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut calls = ToolCallAccumulator::default();
        let mut text = String::new();

        'stream: while let Some(chunk) = bytes.next().await {
            for payload in decoder.push(&chunk?) {
                if payload == "[DONE]" {
                    break 'stream;
                }
                let parsed: StreamChunk = serde_json::from_str(&payload)
                    .map_err(|e| format!("malformed stream event: {e}"))?;
                for choice in parsed.choices {
                    let Some(delta) = choice.delta else { continue };
                    if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                        text.push_str(&content);
                        if tx.unbounded_send(Ok(content)).is_err() {
                            debug!("[LLM] Receiver dropped, abandoning stream");
                            break 'stream;
                        }
                    }
                    for call in delta.tool_calls.unwrap_or_default() {
                        calls.apply(call);
                    }
                }
            }
        }
        Ok(Round {
            text,
            calls: calls.finish(),
        })
    }

    async fn drive(
        self,
        mut messages: Vec<Value>,
        options: ChatOptions,
        tools: Option<FileTools>,
        mut response: reqwest::Response,
        tx: Sender,
    ) {
        for round in 0.. {
            let outcome = match Self::read_round(response, &tx).await {
                Ok(o) => o,
                Err(e) => {
                    let _ = tx.unbounded_send(Err(e));
                    return;
                }
            };
            let Some(tools) = tools.as_ref() else { return };
            if outcome.calls.is_empty() || tx.is_closed() {
                return;
            }
            if round + 1 >= MAX_TOOL_ROUNDS {
                warn!(rounds = round + 1, "[LLM] Tool round limit reached");
                let _ = tx.unbounded_send(Err("tool round limit reached".into()));
                return;
            }

            messages.push(json!({
                "role": "assistant",
                "content": outcome.text,
                "tool_calls": outcome.calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })).collect::<Vec<_>>(),
            }));
            for call in &outcome.calls {
                let result = tools.invoke(&call.name, &call.arguments).await;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result,
                }));
            }

            response = match self.send(&Self::body(&messages, &options, true)).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.unbounded_send(Err(e));
                    return;
                }
            };
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, BoxError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        let body = Self::body(&messages, &request.options, request.tools.is_some());
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(
            self.clone()
                .drive(messages, request.options, request.tools, response, tx),
        );
        Ok(Box::pin(rx))
    }
}
