//! Connection authentication

use super::{param_str, ConnectionCtx, HandlerResult, ServerContext};
use serde_json::{json, Value};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// `auth {token}` — must be the first method on every connection. The reply
/// tells the client which agent CLI this server drives. The token check is
/// constant-time; only the length can leak.
pub fn auth(ctx: &Arc<ServerContext>, conn: &mut ConnectionCtx, params: &Value) -> HandlerResult {
    let token = param_str(params, "token")?;
    let supplied = token.as_bytes();
    let expected = ctx.settings.auth_token.as_bytes();

    let ok = supplied.len() == expected.len() && bool::from(supplied.ct_eq(expected));
    if !ok {
        warn!(conn_id = conn.handle.id(), "authentication failed");
        return Err(crate::rpc::RpcError::app("invalid token"));
    }

    conn.authenticated = true;
    Ok(json!({"agent": ctx.settings.agent.as_str()}))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_correct_token_authenticates() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let (mut conn, _rx) = connection();
        let result = auth(&ctx, &mut conn, &json!({"token": "secret-token"})).unwrap();
        assert_eq!(result["agent"], "claude");
        assert!(conn.authenticated);
    }

    #[tokio::test]
    async fn test_wrong_token_rejected_generically() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let (mut conn, _rx) = connection();
        let err = auth(&ctx, &mut conn, &json!({"token": "wrong-token!"})).unwrap_err();
        assert_eq!(err.message, "invalid token");
        assert!(!conn.authenticated);
    }

    #[tokio::test]
    async fn test_missing_token_is_invalid_params() {
        let dir = TempDir::new().unwrap();
        let ctx = server_context(&dir);
        let (mut conn, _rx) = connection();
        let err = auth(&ctx, &mut conn, &json!({})).unwrap_err();
        assert_eq!(err.code, crate::rpc::INVALID_PARAMS);
    }
}
