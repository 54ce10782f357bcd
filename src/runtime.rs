//! Agent step evaluation: drive one worker role's LLM tool-call loop
//! until it produces a terminal assistant message.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{OrchestratorError, Result};
use crate::llm::{chat_with_retry, ChatRequest, LlmClient};
use crate::model::Message;
use crate::tools::{ToolExecutor, ToolKind};

/// The standard suffix appended to every worker role's prompt.
const AUTONOMY_SUFFIX: &str = "\nWork autonomously according to your specialty, using the tools \
     available to you. Do not ask for clarification. Your other team members (and other teams) \
     will collaborate with you with their own specialties. You are chosen for a reason!";

/// A worker role: prompt plus the tools it may call.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: &'static str,
    /// Human-readable description of what the role is doing, used in
    /// progress snapshots.
    pub activity: &'static str,
    pub system_prompt: String,
    pub tools: Vec<ToolKind>,
}

/// Evaluates one agent step inside a team graph.
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    max_tool_rounds: u32,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, tools: ToolExecutor, max_tool_rounds: u32) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds,
        }
    }

    /// Run the role against the accumulated log until it answers without
    /// tool calls, and return that answer tagged with the role's name.
    ///
    /// Tool results are appended in model-emitted order; rounds are
    /// strictly sequential and capped at `max_tool_rounds`.
    #[instrument(skip(self, role, log, cancel), fields(agent = role.name))]
    pub async fn run_step(
        &self,
        role: &RoleSpec,
        log: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let system = Message::system(format!("{}{}", role.system_prompt, AUTONOMY_SUFFIX));
        let schemas: Vec<_> = role.tools.iter().map(|t| t.schema()).collect();

        let mut scratchpad: Vec<Message> = Vec::new();
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let mut messages = Vec::with_capacity(1 + log.len() + scratchpad.len());
            messages.push(system.clone());
            messages.extend_from_slice(log);
            messages.extend_from_slice(&scratchpad);

            let response = chat_with_retry(
                self.llm.as_ref(),
                &ChatRequest {
                    messages,
                    tools: schemas.clone(),
                    tool_choice: None,
                },
                cancel,
            )
            .await?;

            if response.tool_calls.is_empty() {
                debug!("{} finished after {} tool round(s)", role.name, rounds);
                return Ok(Message::ai(role.name, response.content));
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                return Err(OrchestratorError::RecursionExceeded(format!(
                    "agent step for {} exceeded {} tool rounds",
                    role.name, self.max_tool_rounds
                )));
            }

            scratchpad.push(Message::ai_with_tool_calls(
                response.tool_calls.clone(),
                response.content,
            ));

            for call in &response.tool_calls {
                let result = self.tools.execute(&call.name, &call.arguments, cancel).await?;
                scratchpad.push(Message::tool_result(&call.id, &call.name, result));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::ChatResponse;
    use crate::model::ToolCall;
    use crate::search::SearchClient;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoSearch;

    #[async_trait]
    impl SearchClient for NoSearch {
        async fn search(&self, _query: &str) -> Result<String> {
            Ok("results".to_string())
        }
    }

    /// LLM that calls web_search a fixed number of times, then answers.
    struct ToolLoopLlm {
        calls_before_answer: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for ToolLoopLlm {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            if self.calls_before_answer.fetch_sub(1, Ordering::SeqCst) > 0 {
                Ok(ChatResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".into(),
                        name: "web_search".into(),
                        arguments: json!({"query": "more"}),
                    }],
                })
            } else {
                Ok(ChatResponse {
                    content: "final answer".to_string(),
                    tool_calls: vec![],
                })
            }
        }
    }

    fn role() -> RoleSpec {
        RoleSpec {
            name: "PaperResearcher",
            activity: "researching the paper",
            system_prompt: "You research papers.".to_string(),
            tools: vec![ToolKind::WebSearch],
        }
    }

    fn runtime(llm: ToolLoopLlm, max_rounds: u32) -> AgentRuntime {
        AgentRuntime::new(
            Arc::new(llm),
            ToolExecutor::new(Arc::new(NoSearch)),
            max_rounds,
        )
    }

    #[tokio::test]
    async fn step_loops_through_tools_then_answers() {
        let runtime = runtime(
            ToolLoopLlm {
                calls_before_answer: AtomicU32::new(3),
            },
            8,
        );
        let log = vec![Message::human("research transformers")];
        let message = runtime
            .run_step(&role(), &log, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(message.content, "final answer");
        assert_eq!(message.name.as_deref(), Some("PaperResearcher"));
        assert!(message.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn step_fails_past_round_cap() {
        let runtime = runtime(
            ToolLoopLlm {
                calls_before_answer: AtomicU32::new(100),
            },
            4,
        );
        let log = vec![Message::human("research transformers")];
        let err = runtime
            .run_step(&role(), &log, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "recursion_exceeded");
    }

    #[tokio::test]
    async fn step_honors_cancellation() {
        let runtime = runtime(
            ToolLoopLlm {
                calls_before_answer: AtomicU32::new(0),
            },
            8,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runtime
            .run_step(&role(), &[Message::human("hi")], &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}
