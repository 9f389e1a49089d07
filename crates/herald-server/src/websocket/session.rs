//! WebSocket session lifecycle: one admitted client from registration
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use herald_core::UserId;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, Frame};
use super::registry::ConnectionRegistry;
use crate::admission::AdmissionError;
use crate::metrics::{
    WS_ADMISSION_REJECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long the writer gets to flush the close handshake before it is aborted.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a WebSocket session for an admitted user.
///
/// 1. Registers a new [`Connection`] for `user_id`
/// 2. Forwards queued frames (notifications, probes) to the socket
/// 3. Records pongs on the connection's liveness flag
/// 4. Unregisters on close, transport error or eviction
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    user_id: UserId,
    registry: Arc<ConnectionRegistry>,
    send_queue_capacity: usize,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Frame>(send_queue_capacity);
    let connection = Arc::new(Connection::new(user_id, send_tx));
    let conn_id = connection.id.clone();

    let _ = registry.register(connection.clone());
    info!(conn_id = %conn_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Outbound forwarder. Ends when the queue closes, a write fails, or the
    // connection is terminated.
    let writer_conn = connection.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let msg = match frame {
                        Some(Frame::Text(text)) => Message::Text(text.as_ref().into()),
                        Some(Frame::Ping) => Message::Ping(Vec::new().into()),
                        None => break,
                    };
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                () = writer_conn.closed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn_id = %conn_id, ?frame, "client sent close frame");
                    break;
                }
                // Inbound data frames carry nothing for this service; axum
                // answers client pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, error = %e, "websocket error");
                    break;
                }
                None => break,
            },
            () = connection.closed() => {
                debug!(conn_id = %conn_id, "connection terminated");
                break;
            }
            _ = &mut writer => {
                debug!(conn_id = %conn_id, "writer finished");
                writer_done = true;
                break;
            }
        }
    }

    // Unregister first so the connection is gone before the socket is.
    let _ = registry.unregister(user_id, &conn_id);
    connection.terminate();
    // The writer answers `closed()` with a Close frame, which also flushes
    // the reply to a client-initiated close.
    if !writer_done && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        warn!(conn_id = %conn_id, "writer did not finish the close handshake");
        writer.abort();
    }

    info!(
        conn_id = %conn_id,
        connected_at = %connection.created_at,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Close a socket that failed admission with the error's code and reason.
pub async fn reject(mut ws: WebSocket, err: AdmissionError) {
    warn!(code = err.close_code(), reason = err.reason(), error = %err, "rejecting connection");
    counter!(WS_ADMISSION_REJECTIONS_TOTAL, "reason" => err.label()).increment(1);

    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.reason().into(),
    };
    if let Err(e) = ws.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "close frame not delivered");
    }
}
