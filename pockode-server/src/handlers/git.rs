//! Git status, diff, staging, and git-watch methods

use super::{
    ensure_scope, param_bool, param_str, param_str_opt, param_str_vec, ConnectionCtx,
    HandlerResult, ServerContext,
};
use crate::files;
use crate::gitops::GitOps;
use crate::rpc::RpcError;
use serde_json::{json, Value};
use std::sync::Arc;

/// `git.status`
pub async fn status(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let scope = ensure_scope(ctx, conn, params).await?;
    let summary = GitOps::status(scope.work_dir())?;
    Ok(serde_json::to_value(summary).expect("status serializes"))
}

/// `git.diff {path?, staged?}`
pub async fn diff(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let path = match param_str_opt(params, "path") {
        Some(p) => {
            let rel = files::validate_rel_path(p)
                .ok_or_else(|| RpcError::invalid_params("invalid path"))?;
            Some(rel.to_string_lossy().to_string())
        }
        None => None,
    };
    let staged = param_bool(params, "staged");
    let scope = ensure_scope(ctx, conn, params).await?;
    let text = GitOps::diff(scope.work_dir(), path.as_deref(), staged)?;
    Ok(json!({"diff": text}))
}

/// `git.add {paths}`
pub async fn add(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let paths = validated_paths(params)?;
    let scope = ensure_scope(ctx, conn, params).await?;
    GitOps::stage(scope.work_dir(), &paths)?;
    Ok(json!({}))
}

/// `git.reset {paths}`
pub async fn reset(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let paths = validated_paths(params)?;
    let scope = ensure_scope(ctx, conn, params).await?;
    GitOps::reset(scope.work_dir(), &paths)?;
    Ok(json!({}))
}

/// `git.subscribe` — starts receiving `git.status_changed`
pub async fn subscribe(
    ctx: &Arc<ServerContext>,
    conn: &mut ConnectionCtx,
    params: &Value,
) -> HandlerResult {
    let scope = ensure_scope(ctx, conn, params).await?;
    scope.subscribe(&conn.handle);
    let id = scope.git_watcher().subscribe(conn.handle.clone());
    conn.git_subs.insert(id.clone());
    Ok(json!({"subscription_id": id}))
}

/// `git.unsubscribe {id}` — idempotent
pub fn unsubscribe(conn: &mut ConnectionCtx, params: &Value) -> HandlerResult {
    let id = param_str(params, "id")?;
    if let Some(scope) = &conn.scope {
        scope.git_watcher().unsubscribe(id);
    }
    conn.git_subs.remove(id);
    Ok(json!({}))
}

fn validated_paths(params: &Value) -> Result<Vec<String>, RpcError> {
    let paths = param_str_vec(params, "paths")?;
    for path in &paths {
        if files::validate_rel_path(path).is_none() || path.is_empty() {
            return Err(RpcError::invalid_params("invalid path"));
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::dispatch;
    use git2::Repository;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn make_git_repo(project: &Path) {
        let repo = Repository::init(project).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        std::fs::write(project.join("a.txt"), "one\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_add_reset_flow() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let project = dir.path().join("proj");
        make_git_repo(&project);
        std::fs::write(project.join("a.txt"), "two\n").unwrap();
        let (mut conn, _rx) = authed_connection(&ctx).await;

        let status = dispatch(&ctx, &mut conn, "git.status", json!({}))
            .await
            .unwrap();
        let files = status["files"].as_array().unwrap();
        assert!(files
            .iter()
            .any(|f| f["path"] == "a.txt" && f["staged"] == false));

        dispatch(&ctx, &mut conn, "git.add", json!({"paths": ["a.txt"]}))
            .await
            .unwrap();
        let status = dispatch(&ctx, &mut conn, "git.status", json!({}))
            .await
            .unwrap();
        assert!(status["files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["path"] == "a.txt" && f["staged"] == true));

        dispatch(&ctx, &mut conn, "git.reset", json!({"paths": ["a.txt"]}))
            .await
            .unwrap();
        let status = dispatch(&ctx, &mut conn, "git.status", json!({}))
            .await
            .unwrap();
        assert!(status["files"]
            .as_array()
            .unwrap()
            .iter()
            .all(|f| !(f["path"] == "a.txt" && f["staged"] == true)));
        conn.close(&ctx).await;
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_diff_shows_change() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let project = dir.path().join("proj");
        make_git_repo(&project);
        std::fs::write(project.join("a.txt"), "two\n").unwrap();
        let (mut conn, _rx) = authed_connection(&ctx).await;

        let result = dispatch(
            &ctx,
            &mut conn,
            "git.diff",
            json!({"path": "a.txt", "staged": false}),
        )
        .await
        .unwrap();
        let text = result["diff"].as_str().unwrap();
        assert!(text.contains("+two"));
        conn.close(&ctx).await;
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let (mut conn, _rx) = authed_connection(&ctx).await;
        let err = dispatch(&ctx, &mut conn, "git.add", json!({"paths": ["../x"]}))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::rpc::INVALID_PARAMS);
        conn.close(&ctx).await;
        ctx.manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_git_subscribe_cycle() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        make_git_repo(&dir.path().join("proj"));
        let (mut conn, _rx) = authed_connection(&ctx).await;

        let result = dispatch(&ctx, &mut conn, "git.subscribe", json!({}))
            .await
            .unwrap();
        let id = result["subscription_id"].as_str().unwrap().to_string();
        let scope = conn.scope.clone().unwrap();
        assert_eq!(scope.git_watcher().subscriber_count(), 1);

        dispatch(&ctx, &mut conn, "git.unsubscribe", json!({"id": id}))
            .await
            .unwrap();
        assert_eq!(scope.git_watcher().subscriber_count(), 0);
        conn.close(&ctx).await;
        ctx.manager.shutdown().await;
    }
}
