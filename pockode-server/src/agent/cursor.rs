//! Cursor agent CLI integration

use super::{AgentCli, SpawnSpec};
use pockode_config::AgentKind;
use serde_json::{json, Value};

/// Drives `cursor-agent` in its JSON stream mode. The message shapes are
/// flatter than Claude's; classification on the way back is shared.
pub struct CursorCli {
    command_path: String,
}

impl Default for CursorCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorCli {
    pub fn new() -> Self {
        Self {
            command_path: "cursor-agent".to_string(),
        }
    }
}

impl AgentCli for CursorCli {
    fn kind(&self) -> AgentKind {
        AgentKind::CursorAgent
    }

    fn build_command(&self, spec: &SpawnSpec) -> (String, Vec<String>) {
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        if spec.resume {
            args.push("--resume".to_string());
        }
        args.push("--session".to_string());
        args.push(spec.session_id.clone());
        (self.command_path.clone(), args)
    }

    fn user_message(&self, content: &str) -> Value {
        json!({"type": "user", "text": content})
    }

    fn interrupt(&self) -> Value {
        json!({"type": "interrupt"})
    }

    fn permission_response(&self, request_id: &str, choice: &str, extra: &Value) -> Value {
        json!({
            "type": "permission_response",
            "request_id": request_id,
            "choice": choice,
            "extra": extra,
        })
    }

    fn question_response(&self, request_id: &str, answer: &str) -> Value {
        json!({
            "type": "question_response",
            "request_id": request_id,
            "answer": answer,
        })
    }
}
