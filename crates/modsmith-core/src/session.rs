//! The tool-calling conversation loop.
//!
//! A [`Session`] renders its prompt template once, then alternates model
//! turns and tool executions until the model answers without calling a
//! tool or the turn ceiling is reached. The [`Toolbox`] passed to
//! [`Session::run`] is handed back in the [`SessionOutcome`], carrying
//! whatever state the tool calls left behind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use minijinja::Environment;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{ContentBlock, LlmError, Message, Model, ToolDefinition, TurnRequest};
use crate::llm::anthropic::DEFAULT_MAX_TOKENS;

/// Turn ceiling applied when none is configured.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Errors that abort a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no prompt template set")]
    MissingPrompt,

    #[error("failed to render prompt: {0}")]
    Template(#[from] minijinja::Error),

    #[error("model {model} failed on turn {turn}: {source}")]
    Model {
        model: String,
        turn: usize,
        #[source]
        source: LlmError,
    },
}

/// The tools a session exposes to the model, and the state they act on.
#[async_trait]
pub trait Toolbox: Send {
    /// Definitions sent to the model with every turn.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one tool call. An error is reported back to the model as a
    /// failed tool result; it does not end the session.
    async fn call(&mut self, name: &str, input: Value) -> anyhow::Result<String>;
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running { turn: usize },
    Terminal(StopReason),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model replied without calling a tool.
    Finished,
    /// The turn ceiling was reached while the model was still calling tools.
    TurnLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Finished => write!(f, "finished"),
            StopReason::TurnLimit => write!(f, "turn limit"),
        }
    }
}

/// The result of running a session.
#[derive(Debug)]
pub struct SessionOutcome<T> {
    pub binding: T,
    pub transcript: Vec<Message>,
    /// Text of the model's final reply.
    pub last_reply: String,
    pub turns: usize,
    pub tool_calls: usize,
    pub stop: StopReason,
}

impl<T> SessionOutcome<T> {
    /// The toolbox as the last tool call left it.
    pub fn into_binding(self) -> T {
        self.binding
    }
}

/// A configured, not yet started, conversation.
#[derive(Clone)]
pub struct Session {
    model: Arc<dyn Model>,
    template: Option<String>,
    vars: BTreeMap<String, String>,
    max_turns: usize,
    max_tokens: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.model.name())
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

impl Session {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            template: None,
            vars: BTreeMap::new(),
            max_turns: DEFAULT_MAX_TURNS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Template for the opening user message. Variables are substituted
    /// with minijinja syntax (`{{ assignment }}`).
    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_prompt_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Render the opening prompt.
    pub fn render_prompt(&self) -> Result<String, SessionError> {
        let template = self.template.as_deref().ok_or(SessionError::MissingPrompt)?;
        let env = Environment::new();
        Ok(env.render_str(template, &self.vars)?)
    }

    /// Drive the conversation to completion.
    pub async fn run<T: Toolbox>(self, mut toolbox: T) -> Result<SessionOutcome<T>, SessionError> {
        let mut state = SessionState::Idle;
        debug!(?state, model = self.model.name(), "session starting");

        let prompt = self.render_prompt()?;
        let tools = toolbox.definitions();
        let mut messages = vec![Message::user_text(prompt)];
        let mut tool_calls = 0;
        let mut last_reply = String::new();

        for turn in 1..=self.max_turns {
            state = SessionState::Running { turn };
            debug!(?state, "requesting model turn");

            let request = TurnRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: self.max_tokens,
            };
            let reply = self
                .model
                .complete(&request)
                .await
                .map_err(|source| SessionError::Model {
                    model: self.model.name().to_string(),
                    turn,
                    source,
                })?;

            last_reply = reply.text_content();
            let calls = reply.tool_calls();
            messages.push(Message::assistant(reply.content));

            if calls.is_empty() {
                state = SessionState::Terminal(StopReason::Finished);
                info!(?state, turns = turn, tool_calls, "session finished");
                return Ok(SessionOutcome {
                    binding: toolbox,
                    transcript: messages,
                    last_reply,
                    turns: turn,
                    tool_calls,
                    stop: StopReason::Finished,
                });
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                tool_calls += 1;
                let (content, is_error) = match toolbox.call(&call.name, call.input).await {
                    Ok(out) => (out, false),
                    Err(e) => {
                        debug!(tool = %call.name, err = %e, "tool call failed");
                        (format!("{e:#}"), true)
                    }
                };
                debug!(tool = %call.name, is_error, bytes = content.len(), "tool call");
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id,
                    content,
                    is_error,
                });
            }
            messages.push(Message::user(results));
        }

        state = SessionState::Terminal(StopReason::TurnLimit);
        warn!(
            ?state,
            max_turns = self.max_turns,
            tool_calls,
            "session reached its turn ceiling"
        );
        Ok(SessionOutcome {
            binding: toolbox,
            transcript: messages,
            last_reply,
            turns: self.max_turns,
            tool_calls,
            stop: StopReason::TurnLimit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelReply;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies; once exhausted, keeps calling `count`.
    struct Canned {
        replies: Mutex<VecDeque<ModelReply>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl Canned {
        fn new(replies: Vec<ModelReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Model for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: &TurnRequest) -> Result<ModelReply, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| call("loop", "count", json!({}))))
        }
    }

    fn call(id: &str, name: &str, input: Value) -> ModelReply {
        ModelReply {
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: name.into(),
                input,
            }],
            stop_reason: Some("tool_use".into()),
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        count: usize,
    }

    #[async_trait]
    impl Toolbox for Counter {
        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "count".into(),
                description: "increment".into(),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn call(&mut self, name: &str, _input: Value) -> anyhow::Result<String> {
            match name {
                "count" => {
                    self.count += 1;
                    Ok(self.count.to_string())
                }
                other => anyhow::bail!("unknown tool {other}"),
            }
        }
    }

    fn session(model: Arc<Canned>) -> Session {
        Session::new(model).with_prompt_template("Do {{ task }}").with_prompt_var("task", "it")
    }

    #[tokio::test]
    async fn no_tool_calls_ends_after_one_turn() {
        let model = Canned::new(vec![ModelReply::text("done")]);
        let outcome = session(model.clone()).run(Counter::default()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::Finished);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.last_reply, "done");
        assert_eq!(outcome.into_binding().count, 0);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0], Message::user_text("Do it"));
        assert_eq!(requests[0].tools[0].name, "count");
    }

    #[tokio::test]
    async fn tool_calls_mutate_binding() {
        let model = Canned::new(vec![
            call("1", "count", json!({})),
            call("2", "count", json!({})),
            ModelReply::text("two"),
        ]);
        let outcome = session(model).run(Counter::default()).await.unwrap();
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(outcome.turns, 3);
        assert_eq!(outcome.binding.count, 2);
    }

    #[tokio::test]
    async fn tool_errors_become_error_results() {
        let model = Canned::new(vec![call("1", "explode", json!({})), ModelReply::text("ok")]);
        let outcome = session(model.clone()).run(Counter::default()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::Finished);
        let requests = model.requests.lock().unwrap();
        let last = requests[1].messages.last().unwrap();
        match &last.content[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "1");
                assert!(is_error);
                assert!(content.contains("unknown tool explode"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn turn_ceiling_ends_without_error() {
        let model = Canned::new(Vec::new());
        let outcome = session(model.clone())
            .with_max_turns(3)
            .run(Counter::default())
            .await
            .unwrap();
        assert_eq!(outcome.stop, StopReason::TurnLimit);
        assert_eq!(outcome.turns, 3);
        assert_eq!(outcome.binding.count, 3);
        assert_eq!(model.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_template_is_an_error() {
        let model = Canned::new(Vec::new());
        let err = Session::new(model).run(Counter::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::MissingPrompt));
    }

    #[test]
    fn unset_vars_render_empty() {
        let model = Canned::new(Vec::new());
        let prompt = Session::new(model)
            .with_prompt_template("[{{ missing }}]")
            .render_prompt()
            .unwrap();
        assert_eq!(prompt, "[]");
    }
}
