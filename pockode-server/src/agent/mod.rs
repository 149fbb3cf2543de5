//! Agent CLI abstraction
//!
//! Each supported AI CLI (Claude, Cursor) implements [`AgentCli`] to define
//! how its process is spawned and how user input and control messages are
//! encoded onto its stdin. Output classification is shared: every stdout
//! line is matched against the known event kinds; anything else is forwarded
//! as `raw` so output is never silently dropped.

mod claude;
mod cursor;

pub use claude::ClaudeCli;
pub use cursor::CursorCli;

use pockode_config::AgentKind;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

/// Event kinds recognized on the agent's stdout stream.
///
/// `ProcessEnded` is synthesized by the process manager on child exit; the
/// remaining kinds come from the stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Text,
    ToolCall,
    ToolResult,
    Warning,
    Error,
    Done,
    Interrupted,
    ProcessEnded,
    PermissionRequest,
    RequestCancelled,
    AskUserQuestion,
    System,
    Raw,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Warning => "warning",
            EventKind::Error => "error",
            EventKind::Done => "done",
            EventKind::Interrupted => "interrupted",
            EventKind::ProcessEnded => "process_ended",
            EventKind::PermissionRequest => "permission_request",
            EventKind::RequestCancelled => "request_cancelled",
            EventKind::AskUserQuestion => "ask_user_question",
            EventKind::System => "system",
            EventKind::Raw => "raw",
        }
    }

    fn from_type_str(s: &str) -> Option<Self> {
        Some(match s {
            "text" => EventKind::Text,
            "tool_call" => EventKind::ToolCall,
            "tool_result" => EventKind::ToolResult,
            "warning" => EventKind::Warning,
            "error" => EventKind::Error,
            "done" => EventKind::Done,
            "interrupted" => EventKind::Interrupted,
            "permission_request" => EventKind::PermissionRequest,
            "request_cancelled" => EventKind::RequestCancelled,
            "ask_user_question" => EventKind::AskUserQuestion,
            "system" => EventKind::System,
            "raw" => EventKind::Raw,
            _ => return None,
        })
    }
}

/// One event read from the agent's stdout
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub kind: EventKind,
    payload: Map<String, Value>,
}

impl AgentEvent {
    /// Classify one stdout line. Valid JSON objects with a recognized `type`
    /// keep their shape; everything else becomes a `raw` event carrying the
    /// original text.
    pub fn classify(line: &str) -> Self {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(line) {
            if let Some(kind) = obj
                .get("type")
                .and_then(Value::as_str)
                .and_then(EventKind::from_type_str)
            {
                return Self { kind, payload: obj };
            }
        }
        let mut payload = Map::new();
        payload.insert("text".to_string(), Value::String(line.to_string()));
        Self {
            kind: EventKind::Raw,
            payload,
        }
    }

    /// Synthesized end-of-process event
    pub fn process_ended(exit_code: Option<i32>) -> Self {
        let mut payload = Map::new();
        payload.insert("exit_code".to_string(), json!(exit_code));
        Self {
            kind: EventKind::ProcessEnded,
            payload,
        }
    }

    /// The record appended to session history: the event's JSON verbatim,
    /// with the `type` discriminator guaranteed present.
    pub fn history_record(&self) -> Value {
        let mut obj = self.payload.clone();
        obj.insert(
            "type".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        Value::Object(obj)
    }

    /// Notification method name: `chat.<kind>`
    pub fn notification_method(&self) -> String {
        format!("chat.{}", self.kind.as_str())
    }

    /// Notification params: the event fields plus the session id
    pub fn notification_params(&self, session_id: &str) -> Value {
        let mut obj = self.payload.clone();
        obj.insert(
            "type".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        obj.insert(
            "sessionId".to_string(),
            Value::String(session_id.to_string()),
        );
        Value::Object(obj)
    }
}

/// How to spawn an agent process for one session
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub work_dir: PathBuf,
    pub session_id: String,
    pub resume: bool,
}

/// One AI CLI integration.
///
/// User content never appears in argv; it is written to stdin as
/// newline-delimited JSON.
pub trait AgentCli: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Program and argv for spawning the process. The work dir becomes the
    /// child's CWD; the session id and resume flag ride in the arguments.
    fn build_command(&self, spec: &SpawnSpec) -> (String, Vec<String>);

    /// Encode one user message for stdin
    fn user_message(&self, content: &str) -> Value;

    /// Encode an interrupt for the current turn
    fn interrupt(&self) -> Value;

    /// Encode a permission decision
    fn permission_response(&self, request_id: &str, choice: &str, extra: &Value) -> Value;

    /// Encode an answer to an agent question
    fn question_response(&self, request_id: &str, answer: &str) -> Value;
}

/// The CLI implementation for a configured agent kind
pub fn agent_cli(kind: AgentKind) -> Box<dyn AgentCli> {
    match kind {
        AgentKind::Claude => Box::new(ClaudeCli::new()),
        AgentKind::CursorAgent => Box::new(CursorCli::new()),
    }
}
