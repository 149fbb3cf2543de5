//! File access and filesystem watch methods

use super::{ensure_scope, param_str, ConnectionCtx, HandlerResult, ServerContext};
use crate::files::{self, FileNode};
use crate::rpc::RpcError;
use serde_json::{json, Value};
use std::sync::Arc;

/// `file.get {path}` — directory listing or file content. The empty path is
/// the work dir root.
pub async fn get(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let path = param_str(params, "path")?;
    let rel = files::validate_rel_path(path)
        .ok_or_else(|| RpcError::invalid_params("invalid path"))?;
    let scope = ensure_scope(ctx, conn, params).await?;
    match files::get(scope.work_dir(), &rel)? {
        FileNode::Directory(entries) => Ok(json!({"type": "directory", "entries": entries})),
        FileNode::File(file) => Ok(json!({"type": "file", "file": file})),
    }
}

/// `fs.subscribe {path}` — watch a subtree for changes
pub async fn fs_subscribe(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let path = param_str(params, "path")?;
    let rel = files::validate_rel_path(path)
        .ok_or_else(|| RpcError::invalid_params("invalid path"))?;
    let scope = ensure_scope(ctx, conn, params).await?;
    scope.subscribe(&conn.handle);
    let id = scope.fs_watcher().subscribe(conn.handle.clone(), rel)?;
    conn.fs_subs.insert(id.clone());
    Ok(json!({"subscription_id": id}))
}

/// `fs.unsubscribe {id}` — idempotent
pub fn fs_unsubscribe(conn: &mut ConnectionCtx, params: &Value) -> HandlerResult {
    let id = param_str(params, "id")?;
    if let Some(scope) = &conn.scope {
        scope.fs_watcher().unsubscribe(id);
    }
    conn.fs_subs.remove(id);
    Ok(json!({}))
}
