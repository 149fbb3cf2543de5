//! One running agent subprocess
//!
//! The child speaks newline-delimited JSON: user messages and control
//! frames go to stdin, events come back on stdout. Stdout is handed to the
//! process manager's pump at spawn time; this type owns stdin, the kill
//! handle, and the idle clock.

use crate::agent::{AgentCli, SpawnSpec};
use crate::error::ProcessError;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

pub struct AgentProcess {
    session_id: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    last_active: StdMutex<Instant>,
}

impl AgentProcess {
    /// Spawn the agent for one session. Returns the process handle and the
    /// child's stdout for the caller's event pump.
    pub fn spawn(
        agent: &dyn AgentCli,
        spec: &SpawnSpec,
    ) -> Result<(Self, ChildStdout), ProcessError> {
        let (program, args) = agent.build_command(spec);
        debug!(
            session_id = %spec.session_id,
            program = %program,
            resume = spec.resume,
            "spawning agent process"
        );

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ProcessError::StdinClosed)?;
        let stdout = child.stdout.take().ok_or(ProcessError::StdinClosed)?;

        Ok((
            Self {
                session_id: spec.session_id.clone(),
                stdin: Mutex::new(stdin),
                child: Mutex::new(child),
                last_active: StdMutex::new(Instant::now()),
            },
            stdout,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Write one JSON value as a line to the child's stdin
    pub async fn write_line(&self, value: &Value) -> Result<(), ProcessError> {
        let mut line = serde_json::to_vec(value).expect("stdin frame serializes");
        line.push(b'\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Ask the OS to terminate the child. The pump observes the resulting
    /// stdout EOF and runs the shared teardown path.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(session_id = %self.session_id, error = %e, "kill failed (already exited?)");
        }
    }

    /// Reap the child and return its exit code, if any
    pub async fn wait_exit_code(&self) -> Option<i32> {
        let mut child = self.child.lock().await;
        match child.wait().await {
            Ok(status) => status.code(),
            Err(_) => None,
        }
    }

    pub fn touch(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().unwrap().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent_cli;
    use pockode_config::AgentKind;

    fn spec(session_id: &str) -> SpawnSpec {
        SpawnSpec {
            work_dir: std::env::temp_dir(),
            session_id: session_id.to_string(),
            resume: false,
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        // The configured CLI is not on PATH in the test environment.
        let agent = agent_cli(AgentKind::CursorAgent);
        let result = AgentProcess::spawn(agent.as_ref(), &spec("s1"));
        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_touch_resets_idle_clock() {
        // Use a shell as a stand-in child so no agent binary is needed.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let process = AgentProcess {
            session_id: "s1".to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            last_active: StdMutex::new(Instant::now() - std::time::Duration::from_secs(60)),
        };
        assert!(process.idle_for() >= std::time::Duration::from_secs(60));
        process.touch();
        assert!(process.idle_for() < std::time::Duration::from_secs(1));
        process.kill().await;
        process.wait_exit_code().await;
    }
}
