//! Chat methods: the bridge between connections and agent processes

use super::{ensure_scope, param_str, ConnectionCtx, HandlerResult, ServerContext};
use crate::error::ProcessError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// `chat.messages.subscribe {id}` — joins this session's event fan-out and
/// reports whether a process is currently running. Does not spawn one.
pub async fn messages_subscribe(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    if scope.store().get(id).is_none() {
        return Err(crate::error::StoreError::SessionNotFound(id.to_string()).into());
    }
    scope.subscribe(&conn.handle);
    scope.processes().subscribe_rpc(id, &conn.handle);
    conn.chat_subs.insert(id.to_string());
    scope.processes().touch(id).await;
    Ok(json!({"process_running": scope.processes().has_process(id).await}))
}

/// `chat.messages.unsubscribe {id}` — idempotent
pub fn messages_unsubscribe(conn: &mut ConnectionCtx, params: &Value) -> HandlerResult {
    let id = param_str(params, "id")?;
    if let Some(scope) = &conn.scope {
        scope.processes().unsubscribe_rpc(id, conn.handle.id());
    }
    conn.chat_subs.remove(id);
    Ok(json!({}))
}

/// `chat.message {id, content}` — ensures a process (resuming if this
/// session already ran one), persists the user record, activates the
/// session, and forwards the content on stdin.
pub async fn message(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let content = param_str(params, "content")?;
    let scope = ensure_scope(ctx, conn, params).await?;

    let meta = scope
        .store()
        .get(id)
        .ok_or_else(|| crate::error::StoreError::SessionNotFound(id.to_string()))?;

    let resume = meta.activated;
    let (process, _created) = scope.processes().get_or_create(id, resume).await?;

    if let Err(e) = scope
        .store()
        .append_history(id, &json!({"type": "user", "content": content}))
    {
        warn!(session_id = id, error = %e, "failed to persist user message");
    }
    if !meta.activated {
        scope.store().activate(id)?;
    }

    let frame = scope.processes().agent().user_message(content);
    process.write_line(&frame).await?;
    Ok(json!({}))
}

/// `chat.interrupt {id}` — aborts the current turn, leaves the process alive
pub async fn interrupt(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    let process = scope
        .processes()
        .get_process(id)
        .await
        .ok_or_else(|| ProcessError::NotRunning(id.to_string()))?;
    process.write_line(&scope.processes().agent().interrupt()).await?;
    Ok(json!({}))
}

/// `chat.permission_response {id, request_id, choice, extra?}`
pub async fn permission_response(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let request_id = param_str(params, "request_id")?;
    let choice = param_str(params, "choice")?;
    let extra = params.get("extra").cloned().unwrap_or_else(|| json!({}));
    let scope = ensure_scope(ctx, conn, params).await?;
    let process = scope
        .processes()
        .get_process(id)
        .await
        .ok_or_else(|| ProcessError::NotRunning(id.to_string()))?;
    let frame = scope
        .processes()
        .agent()
        .permission_response(request_id, choice, &extra);
    process.write_line(&frame).await?;
    Ok(json!({}))
}

/// `chat.question_response {id, request_id, answer}`
pub async fn question_response(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let request_id = param_str(params, "request_id")?;
    let answer = param_str(params, "answer")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    let process = scope
        .processes()
        .get_process(id)
        .await
        .ok_or_else(|| ProcessError::NotRunning(id.to_string()))?;
    let frame = scope
        .processes()
        .agent()
        .question_response(request_id, answer);
    process.write_line(&frame).await?;
    Ok(json!({}))
}
