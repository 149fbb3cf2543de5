//! Worktree registry methods

use super::{param_bool, param_str, param_str_opt, ConnectionCtx, HandlerResult, ServerContext};
use crate::error::WorktreeError;
use serde_json::{json, Value};
use std::sync::Arc;

/// `worktree.list` — returns the `WorktreeInfo` array directly
pub fn list(ctx: &Arc<ServerContext>) -> HandlerResult {
    let worktrees = ctx.manager.registry().list()?;
    Ok(serde_json::to_value(worktrees).expect("worktree list serializes"))
}

/// `worktree.create {name, branch, base_branch?}`
pub fn create(ctx: &Arc<ServerContext>, params: &Value) -> HandlerResult {
    let name = param_str(params, "name")?;
    let branch = param_str(params, "branch")?;
    let base_branch = param_str_opt(params, "base_branch");
    let info = ctx.manager.registry().create(name, branch, base_branch)?;
    ctx.manager.worktree_watcher().broadcast_changed();
    Ok(serde_json::to_value(info).expect("worktree info serializes"))
}

/// `worktree.delete {name, force?}` — tears down the scope first so its
/// subscribers hear `worktree.deleted`, then removes the checkout
pub async fn delete(ctx: &Arc<ServerContext>, params: &Value) -> HandlerResult {
    let name = param_str(params, "name")?;
    if name.is_empty() {
        return Err(WorktreeError::MainWorktree.into());
    }
    let force = param_bool(params, "force");
    // Validate existence and the modified-files rule before touching the scope.
    ctx.manager.registry().resolve(name)?;
    ctx.manager.force_shutdown(name).await;
    ctx.manager.registry().delete(name, force)?;
    ctx.manager.worktree_watcher().broadcast_changed();
    Ok(json!({}))
}

/// `worktree.subscribe` — starts receiving `worktree.list.changed`
pub fn subscribe(ctx: &Arc<ServerContext>, conn: &mut ConnectionCtx) -> HandlerResult {
    let id = ctx
        .manager
        .worktree_watcher()
        .subscribe(conn.handle.clone());
    conn.worktree_subs.insert(id.clone());
    let worktrees = ctx.manager.registry().list()?;
    Ok(json!({"subscription_id": id, "worktrees": worktrees}))
}

/// `worktree.unsubscribe {id?}` — idempotent
pub fn unsubscribe(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let ids: Vec<String> = match param_str_opt(params, "id") {
        Some(id) => vec![id.to_string()],
        None => conn.worktree_subs.iter().cloned().collect(),
    };
    for id in &ids {
        ctx.manager.worktree_watcher().unsubscribe(id);
        conn.worktree_subs.remove(id);
    }
    Ok(json!({}))
}
