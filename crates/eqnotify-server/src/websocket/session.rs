//! WebSocket session lifecycle. Handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::connection::Connection;
use super::handler::{FrameOutcome, NotifyContext, handle_frame};
use super::protocol::OutboundMessage;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Close reason sent when the server is shutting down.
pub const SHUTDOWN_CLOSE_REASON: &str = "server shutting down";

/// Close reason sent when a connection never authenticated in time.
pub const AUTH_TIMEOUT_CLOSE_REASON: &str = "authentication timeout";

/// Per-session knobs.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue length.
    pub outbound_queue_capacity: usize,
    /// Close unauthenticated connections after this long.
    pub auth_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            auth_timeout: None,
        }
    }
}

/// Why the reader loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    TransportError,
    Shutdown,
    AuthTimeout,
}

impl SessionEnd {
    /// Close frame the server sends for this ending, if any.
    fn close_frame(self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::ClientClosed | Self::TransportError => return None,
            Self::Shutdown => (close_code::AWAY, SHUTDOWN_CLOSE_REASON),
            Self::AuthTimeout => (close_code::POLICY, AUTH_TIMEOUT_CLOSE_REASON),
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and sends the `connection` acknowledgment
/// 2. Forwards the outbound queue to the socket from a writer task
/// 3. Dispatches inbound text (and UTF-8 binary) frames
/// 4. Closes with 1001 on shutdown, or 1008 on auth timeout
/// 5. Removes the connection from the registry on every exit path
pub async fn run_ws_session(
    ws: WebSocket,
    ctx: NotifyContext,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.outbound_queue_capacity.max(1));
    let connection = ctx.registry.admit(send_tx);
    drive_session(ws, connection, send_rx, ctx, config, shutdown).await;
}

#[instrument(skip_all, fields(conn_id = %connection.id()))]
async fn drive_session(
    ws: WebSocket,
    connection: Arc<Connection>,
    send_rx: mpsc::Receiver<Arc<String>>,
    ctx: NotifyContext,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // The acknowledgment goes out before the writer starts draining the queue.
    match OutboundMessage::connected().encode() {
        Ok(json) => {
            if ws_tx.send(Message::Text(json.as_str().into())).await.is_err() {
                debug!("client went away before acknowledgment");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize acknowledgment"),
    }

    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(run_writer(ws_tx, send_rx, close_rx).in_current_span());

    let end = read_loop(&mut ws_rx, &connection, &ctx, config, &shutdown).await;
    info!(reason = ?end, "client disconnected");

    // Clean up
    let _ = ctx.registry.remove(connection.id());
    connection.mark_closed();
    let _ = close_tx.send(end.close_frame());
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!("writer did not finish in time, aborting");
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Forward queued frames to the socket until told to stop, then flush what is
/// already queued and send the close frame, if any.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
) {
    let close = loop {
        tokio::select! {
            biased;
            close = &mut close_rx => break close.ok().flatten(),
            msg = send_rx.recv() => {
                let Some(text) = msg else { break None };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    return;
                }
            }
        }
    };

    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
            return;
        }
    }
    if let Some(frame) = close {
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_tx.close().await;
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &Arc<Connection>,
    ctx: &NotifyContext,
    config: SessionConfig,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let auth_deadline = async {
        match config.auth_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(auth_deadline);
    let mut deadline_armed = config.auth_timeout.is_some();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return SessionEnd::Shutdown,
            () = &mut auth_deadline, if deadline_armed => {
                if connection.is_authenticated() {
                    deadline_armed = false;
                    continue;
                }
                info!("closing unauthenticated connection");
                let _ = connection.send_message(&OutboundMessage::error(AUTH_TIMEOUT_CLOSE_REASON));
                return SessionEnd::AuthTimeout;
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "transport error");
                        return SessionEnd::TransportError;
                    }
                    None => return SessionEnd::ClientClosed,
                };

                // Binary frames are accepted when they carry UTF-8 JSON.
                let text = match msg {
                    Message::Text(ref t) => t.as_str().to_owned(),
                    Message::Binary(ref data) => {
                        if let Ok(s) = std::str::from_utf8(data) {
                            s.to_owned()
                        } else {
                            info!(len = data.len(), "received non-UTF8 binary frame");
                            let _ = connection.send_message(&OutboundMessage::error(
                                "binary frames must contain UTF-8 JSON",
                            ));
                            continue;
                        }
                    }
                    Message::Close(_) => {
                        debug!("client sent close frame");
                        return SessionEnd::ClientClosed;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if let FrameOutcome::Authenticated(_) = handle_frame(&text, connection, ctx) {
                    deadline_armed = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Full sessions need a real socket; they are covered in tests/integration.rs.

    use super::*;

    #[test]
    fn shutdown_closes_with_going_away() {
        let frame = SessionEnd::Shutdown.close_frame().unwrap();
        assert_eq!(frame.code, close_code::AWAY);
        assert_eq!(frame.reason.as_str(), SHUTDOWN_CLOSE_REASON);
    }

    #[test]
    fn auth_timeout_closes_with_policy_violation() {
        let frame = SessionEnd::AuthTimeout.close_frame().unwrap();
        assert_eq!(frame.code, close_code::POLICY);
        assert_eq!(frame.reason.as_str(), AUTH_TIMEOUT_CLOSE_REASON);
    }

    #[test]
    fn client_initiated_endings_send_no_close() {
        assert!(SessionEnd::ClientClosed.close_frame().is_none());
        assert!(SessionEnd::TransportError.close_frame().is_none());
    }

    #[test]
    fn default_config_has_no_auth_timeout() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.outbound_queue_capacity, 256);
        assert!(cfg.auth_timeout.is_none());
    }
}
