//! Session index methods

use super::{ensure_scope, param_str, param_str_opt, ConnectionCtx, HandlerResult, ServerContext};
use serde_json::{json, Value};
use std::sync::Arc;

/// `session.list.subscribe` — returns the current list and starts emitting
/// `session.list.changed` for this scope. Idempotent per connection.
pub async fn list_subscribe(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let scope = ensure_scope(ctx, conn, params).await?;
    scope.subscribe(&conn.handle);
    let id = scope.session_watcher().subscribe(conn.handle.clone());
    conn.session_list_subs.insert(id.clone());
    Ok(json!({
        "subscription_id": id,
        "sessions": scope.store().list(),
    }))
}

/// `session.list.unsubscribe {id?}` — idempotent, silent when not subscribed
pub fn list_unsubscribe(conn: &mut ConnectionCtx, params: &Value) -> HandlerResult {
    let ids: Vec<String> = match param_str_opt(params, "id") {
        Some(id) => vec![id.to_string()],
        None => conn.session_list_subs.iter().cloned().collect(),
    };
    if let Some(scope) = &conn.scope {
        for id in &ids {
            scope.session_watcher().unsubscribe(id);
        }
    }
    for id in &ids {
        conn.session_list_subs.remove(id);
    }
    Ok(json!({}))
}

/// `session.create {id}`
pub async fn create(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    let meta = scope.store().create(id)?;
    Ok(serde_json::to_value(meta).expect("session meta serializes"))
}

/// `session.delete {id}` — closes any running process; unknown id is a
/// silent success
pub async fn delete(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    scope.processes().close(id).await;
    scope.store().delete(id)?;
    Ok(json!({}))
}

/// `session.update_title {id, title}`
pub async fn update_title(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let title = param_str(params, "title")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    let meta = scope.store().update_title(id, title)?;
    Ok(serde_json::to_value(meta).expect("session meta serializes"))
}

/// `session.get_history {id}` — raw records in append order
pub async fn get_history(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let id = param_str(params, "id")?;
    let scope = ensure_scope(ctx, conn, params).await?;
    let records = scope.store().history(id)?;
    Ok(json!({"records": records}))
}
