//! LLM provider interface and the OpenAI-compatible HTTP client.
//!
//! The orchestrator only depends on the `LlmClient` capability: submit a
//! message log plus tool definitions, get back text and/or tool calls.
//! Transient failures and timeouts are retried with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::model::{Message, MessageRole, ToolCall};
use crate::settings::Settings;

const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 500;

/// Definition of a tool offered to the model for one call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Force the model to call the named tool.
    pub tool_choice: Option<String>,
}

/// The model's reply: free text and/or tool calls, in emitted order.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Capability interface the orchestrator consumes. Implementations must
/// be safe for concurrent calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Service status string for the health endpoint.
    fn health(&self) -> &'static str {
        "connected"
    }
}

/// Retry policy wrapper: up to two retries with exponential backoff and
/// ±20% jitter, only for timeouts and transient provider failures.
pub async fn chat_with_retry(
    llm: &dyn LlmClient,
    request: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<ChatResponse> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // Racing the call against the token aborts the in-flight request
        // when the job is cancelled.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            result = llm.chat(request.clone()) => result,
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                warn!(
                    "LLM call failed ({}); retry {}/{} in {:?}",
                    e, attempt, MAX_RETRIES, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base as f64 * jitter) as u64)
}

/// OpenAI-compatible chat-completions client.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl HttpLlmClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.llm_timeout())
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.llm_base_url.trim_end_matches('/').to_string(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
            temperature: settings.llm_temperature,
        })
    }

    fn wire_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::Human => "user",
            MessageRole::System => "system",
            MessageRole::Ai => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    fn wire_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut entry = json!({
                    "role": Self::wire_role(m.role),
                    "content": m.content,
                });
                if let Some(name) = &m.name {
                    entry["name"] = json!(sanitize_name(name));
                }
                if let Some(id) = &m.tool_call_id {
                    entry["tool_call_id"] = json!(id);
                }
                if !m.tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(
                        m.tool_calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                entry
            })
            .collect()
    }
}

/// Provider message names must be identifier-like.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": Self::wire_messages(&request.messages),
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = json!({
                    "type": "function",
                    "function": {"name": choice},
                });
            }
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestratorError::Timeout("llm request timed out".to_string())
                } else {
                    OrchestratorError::transient(format!("llm request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &detail));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::unavailable(format!("malformed llm response: {}", e)))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::unavailable("llm response had no choices"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                // Argument strings that fail to parse are preserved
                // verbatim so the tool layer can report them.
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments)),
            })
            .collect();

        debug!("LLM responded with {} tool call(s)", tool_calls.len());
        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }

    fn health(&self) -> &'static str {
        if self.api_key.is_empty() {
            "not_configured"
        } else {
            "connected"
        }
    }
}

fn classify_http_error(status: StatusCode, detail: &str) -> OrchestratorError {
    let message = format!("llm provider returned {}: {}", status, detail);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OrchestratorError::transient(message)
    } else {
        OrchestratorError::unavailable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyLlm {
        failures: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyLlm {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(OrchestratorError::Timeout("simulated".to_string()))
            } else {
                Ok(ChatResponse {
                    content: "ok".to_string(),
                    tool_calls: vec![],
                })
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::human("hi")],
            tools: vec![],
            tool_choice: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_twice_then_succeeds() {
        let llm = FlakyLlm {
            failures: AtomicU32::new(2),
        };
        let cancel = CancellationToken::new();
        let response = chat_with_retry(&llm, &request(), &cancel).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let llm = FlakyLlm {
            failures: AtomicU32::new(10),
        };
        let cancel = CancellationToken::new();
        let err = chat_with_retry(&llm, &request(), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let llm = FlakyLlm {
            failures: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = chat_with_retry(&llm, &request(), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn http_errors_classified() {
        assert!(classify_http_error(StatusCode::TOO_MANY_REQUESTS, "").is_retriable());
        assert!(classify_http_error(StatusCode::BAD_GATEWAY, "").is_retriable());
        assert!(!classify_http_error(StatusCode::UNAUTHORIZED, "").is_retriable());
    }

    #[test]
    fn wire_messages_carry_tool_plumbing() {
        let messages = vec![
            Message::ai_with_tool_calls(
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "web_search".into(),
                    arguments: json!({"query": "transformers"}),
                }],
                "",
            ),
            Message::tool_result("call_1", "web_search", "results"),
        ];
        let wire = HttpLlmClient::wire_messages(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }
}
