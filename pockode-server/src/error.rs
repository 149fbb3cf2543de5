//! Error types for pockode-server

use crate::rpc::RpcError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in session store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SessionNotFound")]
    SessionNotFound(String),

    #[error("SessionAlreadyExists")]
    SessionExists(String),

    #[error("corrupt session index at {path}: {source}")]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur in worktree registry operations
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("InvalidWorktreeName")]
    InvalidName(String),

    #[error("WorktreeNotFound")]
    NotFound(String),

    #[error("WorktreeAlreadyExist")]
    AlreadyExists(String),

    #[error("MainWorktree")]
    MainWorktree,

    #[error("WorktreeModified")]
    Modified(String),

    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in git status/diff/staging operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("NotAGitRepo")]
    NotARepo(PathBuf),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur spawning or driving agent processes
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("agent process has no stdin")]
    StdinClosed,

    #[error("ProcessNotRunning")]
    NotRunning(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in `file.get`
#[derive(Debug, Error)]
pub enum FileError {
    #[error("FileNotFound")]
    NotFound(String),

    #[error("BinaryFile")]
    Binary(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the watcher family
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher not started")]
    NotStarted,

    #[error("watch failed: {0}")]
    Notify(#[from] notify::Error),
}

/// Top-level server error type
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convert a domain error into a JSON-RPC error object.
///
/// Validation failures map to invalid-params; everything else becomes an
/// application error carrying the domain error string. Internal detail
/// (paths, io causes) stays in the logs, not on the wire.
impl From<ServerError> for RpcError {
    fn from(err: ServerError) -> Self {
        match &err {
            ServerError::Worktree(WorktreeError::InvalidName(_)) => {
                RpcError::invalid_params(err.to_string())
            }
            ServerError::Store(StoreError::SessionNotFound(_))
            | ServerError::Store(StoreError::SessionExists(_))
            | ServerError::Worktree(WorktreeError::NotFound(_))
            | ServerError::Worktree(WorktreeError::AlreadyExists(_))
            | ServerError::Worktree(WorktreeError::MainWorktree)
            | ServerError::Worktree(WorktreeError::Modified(_))
            | ServerError::Process(ProcessError::NotRunning(_))
            | ServerError::Git(GitError::NotARepo(_))
            | ServerError::File(FileError::NotFound(_))
            | ServerError::File(FileError::Binary(_)) => RpcError::app(err.to_string()),
            _ => {
                tracing::warn!(error = %err, "request failed");
                RpcError::app("internal error")
            }
        }
    }
}

macro_rules! rpc_error_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for RpcError {
            fn from(err: $ty) -> Self {
                RpcError::from(ServerError::from(err))
            }
        })+
    };
}

rpc_error_from!(StoreError, WorktreeError, GitError, ProcessError, FileError, WatchError);

pub type Result<T> = std::result::Result<T, ServerError>;
