//! Process-wide configuration for the pockode server
//!
//! Everything here is resolved once at startup (CLI flags and `POCKODE_*`
//! environment variables, merged by the binary) and treated as immutable by
//! the rest of the system.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default listen port
pub const DEFAULT_PORT: u16 = 9900;

/// Default idle timeout before an agent process is reaped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Which AI coding CLI the server drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "cursor-agent")]
    CursorAgent,
}

impl AgentKind {
    /// Wire name, as reported by the `auth` response
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::CursorAgent => "cursor-agent",
        }
    }

    /// Executable looked up in PATH
    pub fn command(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::CursorAgent => "cursor-agent",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown agent '{0}' (expected 'claude' or 'cursor-agent')")]
pub struct UnknownAgent(String);

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AgentKind::Claude),
            "cursor-agent" => Ok(AgentKind::CursorAgent),
            other => Err(UnknownAgent(other.to_string())),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable server settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bearer token required by the `auth` method
    pub auth_token: String,
    /// Listen host
    pub host: IpAddr,
    /// Listen port
    pub port: u16,
    /// Main working directory (the project the agent edits)
    pub work_dir: PathBuf,
    /// Root of persisted state (session indexes, history logs)
    pub data_dir: PathBuf,
    /// Idle duration after which an agent process is closed
    pub idle_timeout: Duration,
    /// Which AI CLI to spawn
    pub agent: AgentKind,
    /// Identity used when bootstrapping a git repository in a fresh work dir
    pub git_user_name: Option<String>,
    /// See `git_user_name`
    pub git_user_email: Option<String>,
}

impl Settings {
    /// Settings with defaults for everything but the token and work dir
    pub fn new(auth_token: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let data_dir = default_data_dir(&work_dir);
        Self {
            auth_token: auth_token.into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            work_dir,
            data_dir,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            agent: AgentKind::Claude,
            git_user_name: None,
            git_user_email: None,
        }
    }

    /// Address the transport binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Create the data directory if missing
    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(())
    }
}

/// Default data directory: `~/.pockode/<project-name>`
pub fn default_data_dir(work_dir: &Path) -> PathBuf {
    let project = work_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project");
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pockode")
        .join(project)
}
