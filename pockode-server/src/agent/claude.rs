//! Claude Code CLI integration

use super::{AgentCli, SpawnSpec};
use pockode_config::AgentKind;
use serde_json::{json, Value};

/// Drives `claude` in stream-json mode: newline-delimited JSON on both
/// stdin and stdout.
pub struct ClaudeCli {
    command_path: String,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCli {
    pub fn new() -> Self {
        Self {
            command_path: "claude".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_command_path(path: impl Into<String>) -> Self {
        Self {
            command_path: path.into(),
        }
    }
}

impl AgentCli for ClaudeCli {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn build_command(&self, spec: &SpawnSpec) -> (String, Vec<String>) {
        let mut args = vec![
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if spec.resume {
            args.push("--resume".to_string());
            args.push(spec.session_id.clone());
        } else {
            args.push("--session-id".to_string());
            args.push(spec.session_id.clone());
        }
        (self.command_path.clone(), args)
    }

    fn user_message(&self, content: &str) -> Value {
        json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": content}],
            },
        })
    }

    fn interrupt(&self) -> Value {
        json!({
            "type": "control_request",
            "request_id": uuid::Uuid::new_v4().to_string(),
            "request": {"subtype": "interrupt"},
        })
    }

    fn permission_response(&self, request_id: &str, choice: &str, extra: &Value) -> Value {
        json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": {
                    "behavior": choice,
                    "extra": extra,
                },
            },
        })
    }

    fn question_response(&self, request_id: &str, answer: &str) -> Value {
        json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": {"answer": answer},
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_args_carry_session_id() {
        let cli = ClaudeCli::new();
        let (cmd, args) = cli.build_command(&SpawnSpec {
            work_dir: "/tmp".into(),
            session_id: "S1".to_string(),
            resume: false,
        });
        assert_eq!(cmd, "claude");
        let joined = args.join(" ");
        assert!(joined.contains("--session-id S1"));
        assert!(!joined.contains("--resume"));
    }

    #[test]
    fn test_resume_args() {
        let cli = ClaudeCli::new();
        let (_, args) = cli.build_command(&SpawnSpec {
            work_dir: "/tmp".into(),
            session_id: "S1".to_string(),
            resume: true,
        });
        assert!(args.join(" ").contains("--resume S1"));
    }

    #[test]
    fn test_user_message_never_enters_argv() {
        let cli = ClaudeCli::with_command_path("/opt/claude");
        let (_, args) = cli.build_command(&SpawnSpec {
            work_dir: "/tmp".into(),
            session_id: "S1".to_string(),
            resume: false,
        });
        let msg = cli.user_message("rm -rf /");
        assert!(args.iter().all(|a| !a.contains("rm -rf")));
        assert_eq!(msg["message"]["content"][0]["text"], "rm -rf /");
    }

    #[test]
    fn test_interrupt_is_control_request() {
        let msg = ClaudeCli::new().interrupt();
        assert_eq!(msg["type"], "control_request");
        assert_eq!(msg["request"]["subtype"], "interrupt");
    }

    #[test]
    fn test_permission_response_echoes_request_id() {
        let msg = ClaudeCli::new().permission_response("req-1", "allow", &json!({}));
        assert_eq!(msg["response"]["request_id"], "req-1");
        assert_eq!(msg["response"]["response"]["behavior"], "allow");
    }
}
