//! `GET /mcp/ws`: JSON-RPC over WebSocket.
//!
//! One session per socket. Text (or UTF-8 binary) frames are dispatched in
//! arrival order and each reply goes back as one text frame through the
//! session's outbound queue. Pings come from the session heartbeat; a pong
//! refreshes liveness, so a peer that stops answering is closed by the sweep.

use bytes::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchyard_rpc::Dispatcher;

use crate::admission::Connection;
use crate::errors::ApiError;
use crate::metrics::WS_CONNECTIONS_TOTAL;
use crate::routes::session_header;
use crate::server::AppState;
use crate::session::{Frame, MESSAGE_EVENT, Session, SessionKind};
use crate::source::ClientSource;

/// Upgrade after admission; a rejected source never gets a socket.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ClientSource(source): ClientSource,
    headers: HeaderMap,
) -> Response {
    let connection = match state.admission.admit(&source) {
        Ok(connection) => connection,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    let requested = session_header(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, source, requested, connection))
}

/// Outbound frame to WebSocket message.
fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Event { name, data } if name == MESSAGE_EVENT => Message::Text(data.to_string().into()),
        Frame::Event { name, data } => Message::Text(json!({ "event": name, "data": data }).to_string().into()),
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    source: String,
    requested: Option<String>,
    connection: Connection,
) {
    let session = state
        .sessions
        .open(SessionKind::WebSocket, &source, requested.as_deref());
    let Some((mut outbound, reply)) = state.sessions.attach_reply_stream(&session, Some(connection)) else {
        return;
    };
    let id = session.id().to_owned();
    info!(session_id = %id, source = %source, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drains the session queue until the socket refuses a write or
    // the reader below stops.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(to_message(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let closed = session.closed_token();
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let delivered = match msg {
                    Message::Text(text) => answer(&state.dispatcher, &session, &reply, text.as_str()).await,
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => answer(&state.dispatcher, &session, &reply, text).await,
                        Err(_) => {
                            debug!(session_id = %id, "non-utf8 binary frame ignored");
                            true
                        }
                    },
                    Message::Pong(_) | Message::Ping(_) => {
                        session.record_pong();
                        true
                    }
                    Message::Close(_) => break,
                };
                if !delivered {
                    warn!(session_id = %id, "websocket reply undeliverable, closing session");
                    break;
                }
            }
        }
    }

    drop(reply);
    let _ = state.sessions.close(&id, "client disconnected");
    writer.abort();
    info!(session_id = %id, "websocket disconnected");
}

/// Dispatch one payload and queue its reply, waiting for room in the
/// outbound buffer. `false` once the session has closed or the writer is
/// gone; a reply is never dropped while the socket is alive.
async fn answer(dispatcher: &Dispatcher, session: &Session, reply: &mpsc::Sender<Frame>, text: &str) -> bool {
    session.touch();
    let Some(out) = dispatcher.handle_text(text).await else {
        return true;
    };
    let closed = session.closed_token();
    tokio::select! {
        biased;
        () = closed.cancelled() => false,
        sent = reply.send(Frame::message(out)) => sent.is_ok(),
    }
}
