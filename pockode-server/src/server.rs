//! WebSocket transport shell
//!
//! One axum route upgrades to a WebSocket per browser connection. Each
//! connection gets a writer task draining its bounded outbound queue and a
//! read loop doing single-threaded dispatch, so responses and notifications
//! leave in a consistent order per connection. Closing the socket releases
//! every server-side resource the connection held.

use crate::connection::{next_conn_id, ConnectionHandle};
use crate::handlers::{self, ConnectionCtx, ServerContext};
use crate::rpc;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ctx)
}

async fn ws_handler(
    State(ctx): State<Arc<ServerContext>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(ctx, socket))
}

async fn handle_socket(ctx: Arc<ServerContext>, socket: WebSocket) {
    let conn_id = next_conn_id();
    let (handle, mut outbound) = ConnectionHandle::new(conn_id);
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnectionCtx::new(handle.clone());
    info!(conn_id, "connection opened");

    while let Some(message) = stream.next().await {
        let Ok(message) = message else { break };
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let request = match rpc::parse_request(&text) {
            Ok(request) => request,
            Err(e) => {
                handle.respond(rpc::error_response(&Value::Null, &e)).await;
                continue;
            }
        };

        debug!(conn_id, method = %request.method, "request");
        let result =
            handlers::dispatch(&ctx, &mut conn, &request.method, request.params).await;
        let auth_failed = request.method == "auth" && result.is_err();

        if let Some(id) = &request.id {
            let frame = match &result {
                Ok(value) => rpc::response(id, value.clone()),
                Err(e) => rpc::error_response(id, e),
            };
            handle.respond(frame).await;
        }

        // A failed auth closes the socket after the error is queued.
        if auth_failed {
            break;
        }
    }

    conn.close(&ctx).await;
    writer.abort();
    info!(conn_id, "connection closed");
}
