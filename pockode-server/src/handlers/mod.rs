//! JSON-RPC method dispatch
//!
//! A stateless table from method names to handler functions. Per-connection
//! state (auth flag, bound scope, subscription ids) lives in
//! [`ConnectionCtx`], owned by the connection's read loop; handlers run on
//! that loop, so the state needs no lock.

pub mod auth;
pub mod chat;
pub mod file;
pub mod git;
pub mod session;
pub mod worktree;

use crate::connection::ConnectionHandle;
use crate::manager::WorktreeManager;
use crate::rpc::RpcError;
use crate::scope::WorktreeScope;
use pockode_config::Settings;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Process-wide dependencies shared by every handler
pub struct ServerContext {
    pub settings: Arc<Settings>,
    pub manager: Arc<WorktreeManager>,
}

/// Everything one connection holds server-side. `close` releases all of it
/// deterministically when the socket goes away.
pub struct ConnectionCtx {
    pub handle: ConnectionHandle,
    pub authenticated: bool,
    pub scope: Option<Arc<WorktreeScope>>,
    pub chat_subs: HashSet<String>,
    pub fs_subs: HashSet<String>,
    pub git_subs: HashSet<String>,
    pub session_list_subs: HashSet<String>,
    pub worktree_subs: HashSet<String>,
}

impl ConnectionCtx {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            authenticated: false,
            scope: None,
            chat_subs: HashSet::new(),
            fs_subs: HashSet::new(),
            git_subs: HashSet::new(),
            session_list_subs: HashSet::new(),
            worktree_subs: HashSet::new(),
        }
    }

    /// Release every server-side resource this connection holds
    pub async fn close(&mut self, ctx: &ServerContext) {
        ctx.manager
            .worktree_watcher()
            .cleanup_connection(self.handle.id());
        if let Some(scope) = self.scope.take() {
            scope.unsubscribe_connection(self.handle.id());
            ctx.manager.release(&scope);
        }
        self.chat_subs.clear();
        self.fs_subs.clear();
        self.git_subs.clear();
        self.session_list_subs.clear();
        self.worktree_subs.clear();
    }
}

pub type HandlerResult = Result<Value, RpcError>;

/// Route one request. `auth` must come first on every connection; nothing
/// else is dispatched until it succeeds.
pub async fn dispatch(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    method: &str,
    params: Value,
) -> HandlerResult {
    if method == "auth" {
        return auth::auth(ctx, conn, &params);
    }
    if !conn.authenticated {
        return Err(RpcError::app("authentication required"));
    }

    match method {
        "worktree.list" => worktree::list(ctx),
        "worktree.create" => worktree::create(ctx, &params),
        "worktree.delete" => worktree::delete(ctx, &params).await,
        "worktree.subscribe" => worktree::subscribe(ctx, conn),
        "worktree.unsubscribe" => worktree::unsubscribe(ctx, conn, &params),

        "session.list.subscribe" => session::list_subscribe(ctx, conn, &params).await,
        "session.list.unsubscribe" => session::list_unsubscribe(conn, &params),
        "session.create" => session::create(ctx, conn, &params).await,
        "session.delete" => session::delete(ctx, conn, &params).await,
        "session.update_title" => session::update_title(ctx, conn, &params).await,
        "session.get_history" => session::get_history(ctx, conn, &params).await,

        "chat.messages.subscribe" => chat::messages_subscribe(ctx, conn, &params).await,
        "chat.messages.unsubscribe" => chat::messages_unsubscribe(conn, &params),
        "chat.message" => chat::message(ctx, conn, &params).await,
        "chat.interrupt" => chat::interrupt(ctx, conn, &params).await,
        "chat.permission_response" => chat::permission_response(ctx, conn, &params).await,
        "chat.question_response" => chat::question_response(ctx, conn, &params).await,

        "file.get" => file::get(ctx, conn, &params).await,
        "fs.subscribe" => file::fs_subscribe(ctx, conn, &params).await,
        "fs.unsubscribe" => file::fs_unsubscribe(conn, &params),

        "git.status" => git::status(ctx, conn, &params).await,
        "git.diff" => git::diff(ctx, conn, &params).await,
        "git.add" => git::add(ctx, conn, &params).await,
        "git.reset" => git::reset(ctx, conn, &params).await,
        "git.subscribe" => git::subscribe(ctx, conn, &params).await,
        "git.unsubscribe" => git::unsubscribe(conn, &params),

        _ => Err(RpcError::method_not_found(method)),
    }
}

/// Bind the connection to the worktree named in `params` (default: main).
/// Rebinding releases the previous scope.
pub(crate) async fn ensure_scope(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> Result<Arc<WorktreeScope>, RpcError> {
    let name = params
        .get("worktree")
        .and_then(Value::as_str)
        .unwrap_or("");
    if let Some(scope) = &conn.scope {
        if scope.name() == name {
            return Ok(scope.clone());
        }
    }
    let scope = ctx.manager.get(name).await.map_err(RpcError::from)?;
    if let Some(previous) = conn.scope.replace(scope.clone()) {
        previous.unsubscribe_connection(conn.handle.id());
        ctx.manager.release(&previous);
        conn.chat_subs.clear();
        conn.fs_subs.clear();
        conn.git_subs.clear();
        conn.session_list_subs.clear();
    }
    Ok(scope)
}

pub(crate) fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("missing param: {}", key)))
}

pub(crate) fn param_str_opt<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn param_bool(params: &Value, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn param_str_vec(params: &Value, key: &str) -> Result<Vec<String>, RpcError> {
    let items = params
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::invalid_params(format!("missing param: {}", key)))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| RpcError::invalid_params(format!("{} must be strings", key)))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::connection::next_conn_id;
    use crate::registry::WorktreeRegistry;
    use crate::watcher::WorktreeWatcher;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    pub fn server_context(dir: &TempDir) -> Arc<ServerContext> {
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let mut settings = Settings::new("secret-token", &project);
        settings.data_dir = dir.path().join("data");
        settings.ensure_data_dir().unwrap();
        let settings = Arc::new(settings);
        let registry = Arc::new(WorktreeRegistry::new(&project).unwrap());
        let worktree_watcher = WorktreeWatcher::new(registry.clone());
        let manager = WorktreeManager::new(settings.clone(), registry, worktree_watcher);
        Arc::new(ServerContext { settings, manager })
    }

    pub fn connection() -> (ConnectionCtx, mpsc::Receiver<String>) {
        let (handle, rx) = ConnectionHandle::new(next_conn_id());
        (ConnectionCtx::new(handle), rx)
    }

    pub async fn authed_connection(
        ctx: &Arc<ServerContext>,
    ) -> (ConnectionCtx, mpsc::Receiver<String>) {
        let (mut conn, rx) = connection();
        dispatch(
            ctx,
            &mut conn,
            "auth",
            serde_json::json!({"token": "secret-token"}),
        )
        .await
        .unwrap();
        (conn, rx)
    }
}
