//! WebSocket endpoint: one read loop per connected client

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header::ORIGIN},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tracing::Instrument;

use super::ApiState;
use crate::protocol::{self, Envelope, Payload};
use crate::{Error, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = check_origin(&state.allowed_origins, &headers) {
        tracing::warn!(error = %e, "rejecting WebSocket upgrade");
        return (StatusCode::FORBIDDEN, e.to_string()).into_response();
    }

    match ws {
        Ok(ws) => {
            let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
            ws.on_upgrade(move |socket| {
                serve_connection(socket, state).instrument(tracing::info_span!("session", id))
            })
        }
        Err(rejection) => {
            let e = Error::Upgrade(rejection.body_text());
            tracing::warn!(error = %e, "invalid WebSocket upgrade request");
            rejection.into_response()
        }
    }
}

/// Enforce the origin allowlist
///
/// An empty allowlist accepts everything. Requests without an `Origin`
/// header come from non-browser clients and are accepted.
fn check_origin(allowed: &[String], headers: &HeaderMap) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(origin) = headers.get(ORIGIN) else {
        return Ok(());
    };
    let origin = origin
        .to_str()
        .map_err(|_| Error::Upgrade("origin header is not valid text".to_string()))?;

    if allowed.iter().any(|a| a == origin) {
        Ok(())
    } else {
        Err(Error::Upgrade(format!("origin {origin} is not allowed")))
    }
}

/// Run one session until the peer leaves, a frame is malformed, a write
/// fails, or the server shuts down
pub async fn serve_connection(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown.clone();

    tracing::info!("client connected");

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            () = shutdown_requested(&mut shutdown) => {
                tracing::info!("server shutting down, closing session");
                break;
            }
        };

        let envelope = match frame {
            Some(Ok(Message::Text(text))) => protocol::decode(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => protocol::decode(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("client disconnected");
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read failed, closing session");
                break;
            }
        };

        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "closing session on malformed envelope");
                break;
            }
        };

        log_receipt(&envelope);

        let reply = tokio::select! {
            reply = state.pipeline.respond(&envelope) => reply,
            () = grace_expired(&mut shutdown, state.shutdown_grace) => {
                tracing::warn!("turn outlived shutdown grace, closing session");
                break;
            }
        };

        let Some(reply) = reply else {
            tracing::debug!("nothing to send for this turn");
            continue;
        };

        if let Err(e) = write_envelope(&mut sender, &reply).await {
            tracing::warn!(error = %e, "write failed, closing session");
            break;
        }
    }

    let _ = sender.close().await;
}

async fn write_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<()> {
    let json = String::from_utf8(protocol::encode(envelope)?)
        .map_err(|e| Error::SessionTerminated(e.to_string()))?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| Error::SessionTerminated(e.to_string()))?;
    tracing::debug!(kind = %envelope.kind(), "reply sent");
    Ok(())
}

fn log_receipt(envelope: &Envelope) {
    match &envelope.payload {
        Payload::Audio(audio) => tracing::info!(
            kind = %envelope.kind(),
            bytes = audio.audio.len(),
            mime_type = %audio.mime_type,
            "received audio"
        ),
        _ => tracing::info!(
            kind = %envelope.kind(),
            text = %envelope.summary(),
            "received message"
        ),
    }
}

/// Resolves once shutdown has been signalled (or the server is gone)
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn grace_expired(shutdown: &mut watch::Receiver<bool>, grace: Duration) {
    shutdown_requested(shutdown).await;
    tokio::time::sleep(grace).await;
}
