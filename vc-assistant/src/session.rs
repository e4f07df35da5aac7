//! Tool-calling loop and per-session state for `ask_context` (spec §4.9).
//!
//! The LLM-agnostic contract is expressed as a [`ToolDispatcher`] trait
//! object: the loop itself only knows how to send a turn and interpret
//! tool calls, never which runtime (Ollama, a local llama.cpp server,
//! ...) produced them. A [`NullRuntime`] stub backs the gateway until a
//! real runtime is attached; the assistant service is otherwise
//! instantiated lazily, on first call, rather than at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// One entry of the tool-call transcript returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLogEntry {
    pub call: ToolCall,
    pub result: Value,
}

/// What the model produced for a single turn: either a final answer, or
/// a batch of tool calls to dispatch before looping back (spec §4.9
/// step 1-4).
#[derive(Debug, Clone)]
pub enum ModelTurn {
    Answer(String),
    ToolCalls(Vec<ToolCall>),
}

/// A chat message in the running history sent back to the model each
/// turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// The LLM-agnostic seam: given the running history and the (optional)
/// RAG-retrieved context, produce the next turn. Implementations own
/// model selection, warmup and request formatting.
#[async_trait]
pub trait ChatRuntime: Send + Sync {
    async fn next_turn(&self, history: &[ChatMessage], retrieved_context: &[String]) -> Result<ModelTurn, String>;
    fn runtime_name(&self) -> &'static str;
    fn model_name(&self) -> String;
}

/// Dispatches a single tool call to the read-only tooling layer (spec
/// §4.9 step 2): catalog queries, semantic search, TMDb cached lookup,
/// CSV export dry-run, "open folder" plan. Kept separate from
/// [`ChatRuntime`] so the Read API wiring in `vc-server` can implement
/// just this trait without depending on any particular chat runtime.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, call: &ToolCall) -> Value;
}

/// Backs the gateway before any real chat runtime is attached. Always
/// answers immediately with no tool calls, so `ask_context` remains
/// well-defined (if unhelpful) even with nothing wired up yet.
pub struct NullRuntime;

#[async_trait]
impl ChatRuntime for NullRuntime {
    async fn next_turn(&self, _history: &[ChatMessage], _retrieved_context: &[String]) -> Result<ModelTurn, String> {
        Ok(ModelTurn::Answer(
            "No chat runtime is attached yet; this is a placeholder answer.".to_string(),
        ))
    }

    fn runtime_name(&self) -> &'static str {
        "null"
    }

    fn model_name(&self) -> String {
        "none".to_string()
    }
}

const HARD_TURN_LIMIT: usize = 32;

/// Per-session conversation state. The session's `tool_budget` is a
/// ceiling; a given `ask_context` call may pass a smaller per-call
/// override but never a larger one (spec §9 open question).
pub struct AssistantSession {
    history: Mutex<Vec<ChatMessage>>,
    budget_remaining: Mutex<u32>,
}

impl AssistantSession {
    pub fn new(system_prompt: String, session_tool_budget: u32) -> Self {
        Self {
            history: Mutex::new(vec![ChatMessage {
                role: "system".to_string(),
                content: system_prompt,
            }]),
            budget_remaining: Mutex::new(session_tool_budget),
        }
    }

    pub fn budget_remaining(&self) -> u32 {
        *self.budget_remaining.lock()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskStatus {
    pub runtime: String,
    pub model: String,
    pub gpu: bool,
    pub budget_remaining: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub tool_log: Vec<ToolLogEntry>,
    pub status: AskStatus,
}

/// Registry of live sessions, keyed by an opaque session id, each
/// serialized by its own mutex per spec §5 ("one task per in-flight
/// `ask`, serialized by a per-session mutex").
pub struct AssistantSessions {
    runtime: Arc<dyn ChatRuntime>,
    dispatcher: Arc<dyn ToolDispatcher>,
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<AssistantSession>>>>,
    default_tool_budget: u32,
}

impl AssistantSessions {
    pub fn new(runtime: Arc<dyn ChatRuntime>, dispatcher: Arc<dyn ToolDispatcher>, default_tool_budget: u32) -> Self {
        Self {
            runtime,
            dispatcher,
            sessions: Mutex::new(HashMap::new()),
            default_tool_budget,
        }
    }

    fn session_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<AssistantSession>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(AssistantSession::new(
                    DEFAULT_SYSTEM_PROMPT.to_string(),
                    self.default_tool_budget,
                )))
            })
            .clone()
    }

    /// Run the tool-calling loop for one `ask_context` call (spec §4.9).
    /// `tool_budget` is a per-call override and is clamped to the
    /// session's remaining ceiling, never exceeding it.
    pub async fn ask_context(
        &self,
        session_id: &str,
        item_payload: Option<Value>,
        question: &str,
        tool_budget_override: Option<u32>,
        use_rag: bool,
        retrieve: impl Fn(&str) -> Vec<String>,
    ) -> AskResponse {
        let session = self.session_for(session_id);
        let mut session = session.lock().await;

        let call_budget = tool_budget_override
            .unwrap_or(session.budget_remaining())
            .min(session.budget_remaining());

        {
            let mut history = session.history.lock();
            let mut content = question.to_string();
            if let Some(payload) = &item_payload {
                content = format!("{content}\n\ncontext item: {payload}");
            }
            history.push(ChatMessage {
                role: "user".to_string(),
                content,
            });
        }

        let retrieved = if use_rag { retrieve(question) } else { Vec::new() };

        let mut tool_log = Vec::new();
        let mut remaining = call_budget;
        let mut answer = String::new();

        for _ in 0..HARD_TURN_LIMIT {
            let history_snapshot = session.history.lock().clone();
            let turn = self.runtime.next_turn(&history_snapshot, &retrieved).await;

            let turn = match turn {
                Ok(turn) => turn,
                Err(err) => {
                    answer = format!("assistant runtime error: {err}");
                    break;
                }
            };

            match turn {
                ModelTurn::Answer(text) => {
                    answer = text.clone();
                    session.history.lock().push(ChatMessage {
                        role: "assistant".to_string(),
                        content: text,
                    });
                    break;
                }
                ModelTurn::ToolCalls(calls) => {
                    if remaining == 0 {
                        answer = synthesize_from_tool_log(&tool_log);
                        break;
                    }
                    for call in calls {
                        if remaining == 0 {
                            break;
                        }
                        let result = self.dispatcher.dispatch(&call).await;
                        remaining -= 1;
                        session.history.lock().push(ChatMessage {
                            role: "tool".to_string(),
                            content: format!("{}: {}", call.name, result),
                        });
                        tool_log.push(ToolLogEntry { call, result });
                    }
                }
            }
        }

        if answer.is_empty() {
            answer = synthesize_from_tool_log(&tool_log);
        }

        *session.budget_remaining.lock() = session.budget_remaining().saturating_sub(call_budget - remaining);

        AskResponse {
            answer,
            tool_log,
            status: AskStatus {
                runtime: self.runtime.runtime_name().to_string(),
                model: self.runtime.model_name(),
                gpu: true,
                budget_remaining: session.budget_remaining(),
            },
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are the VideoCatalog assistant. Answer using only catalog data reachable through your tools.";

/// When the loop exhausts its budget or hard limit before the model
/// emits a final answer, synthesize one from whatever tool results were
/// collected (spec §4.9: "terminate the tool loop ... and synthesize an
/// answer with whatever it has").
fn synthesize_from_tool_log(tool_log: &[ToolLogEntry]) -> String {
    if tool_log.is_empty() {
        return "I couldn't find enough information before running out of tool calls.".to_string();
    }
    format!(
        "Based on {} tool lookup(s), here is what I found: {}",
        tool_log.len(),
        tool_log
            .last()
            .map(|entry| entry.result.to_string())
            .unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoToolRuntime {
        turns: AtomicUsize,
    }

    #[async_trait]
    impl ChatRuntime for EchoToolRuntime {
        async fn next_turn(&self, _history: &[ChatMessage], _ctx: &[String]) -> Result<ModelTurn, String> {
            let turn = self.turns.fetch_add(1, Ordering::SeqCst);
            if turn < 3 {
                Ok(ModelTurn::ToolCalls(vec![ToolCall {
                    name: "search_catalog".to_string(),
                    arguments: Value::Null,
                }]))
            } else {
                Ok(ModelTurn::Answer("done".to_string()))
            }
        }

        fn runtime_name(&self) -> &'static str {
            "echo"
        }

        fn model_name(&self) -> String {
            "echo-1".to_string()
        }
    }

    struct EchoDispatcher;

    #[async_trait]
    impl ToolDispatcher for EchoDispatcher {
        async fn dispatch(&self, call: &ToolCall) -> Value {
            serde_json::json!({ "called": call.name })
        }
    }

    #[tokio::test]
    async fn loop_terminates_on_final_answer() {
        let sessions = AssistantSessions::new(
            Arc::new(EchoToolRuntime { turns: AtomicUsize::new(0) }),
            Arc::new(EchoDispatcher),
            8,
        );
        let response = sessions
            .ask_context("s1", None, "what movies do I have", None, false, |_| vec![])
            .await;
        assert_eq!(response.answer, "done");
        assert_eq!(response.tool_log.len(), 3);
        assert_eq!(response.status.budget_remaining, 5);
    }

    #[tokio::test]
    async fn budget_exhaustion_synthesizes_answer() {
        struct AlwaysToolCalls;
        #[async_trait]
        impl ChatRuntime for AlwaysToolCalls {
            async fn next_turn(&self, _h: &[ChatMessage], _c: &[String]) -> Result<ModelTurn, String> {
                Ok(ModelTurn::ToolCalls(vec![ToolCall {
                    name: "search_catalog".to_string(),
                    arguments: Value::Null,
                }]))
            }
            fn runtime_name(&self) -> &'static str {
                "always"
            }
            fn model_name(&self) -> String {
                "always-1".to_string()
            }
        }

        let sessions = AssistantSessions::new(Arc::new(AlwaysToolCalls), Arc::new(EchoDispatcher), 2);
        let response = sessions
            .ask_context("s2", None, "question", None, false, |_| vec![])
            .await;
        assert_eq!(response.tool_log.len(), 2);
        assert_eq!(response.status.budget_remaining, 0);
        assert!(response.answer.contains("tool lookup"));
    }

    #[tokio::test]
    async fn per_call_override_cannot_exceed_session_ceiling() {
        let sessions = AssistantSessions::new(
            Arc::new(EchoToolRuntime { turns: AtomicUsize::new(0) }),
            Arc::new(EchoDispatcher),
            1,
        );
        let response = sessions
            .ask_context("s3", None, "question", Some(100), false, |_| vec![])
            .await;
        // Session ceiling is 1, so only one tool call should have run
        // even though the per-call override asked for 100.
        assert_eq!(response.tool_log.len(), 1);
    }
}
