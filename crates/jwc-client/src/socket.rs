//! Event-socket plumbing: handshake, reader task, reconnect bookkeeping.

use crate::error::{Error, Result};
use crate::node::Node;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// Reconnect state machine for one node's socket.
///
/// `open` mirrors the live connection; `may_reconnect` is cleared by a
/// server-initiated normal close (code 1000) and by client shutdown, after
/// which the probe never dials again.
#[derive(Debug)]
pub(crate) struct SocketState {
    pub started: bool,
    pub open: bool,
    pub may_reconnect: bool,
    pub reconnect_attempts: u32,
    pub last_attempt: Option<Instant>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Default for SocketState {
    fn default() -> Self {
        Self {
            started: false,
            open: false,
            may_reconnect: true,
            reconnect_attempts: 0,
            last_attempt: None,
            close_tx: None,
            task: None,
        }
    }
}

impl SocketState {
    /// Signals the reader to perform a local close (code 1000) and hands
    /// back its task so the caller can await termination.
    pub fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.may_reconnect = false;
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        self.task.take()
    }
}

/// Wait between reconnect attempts; capped in practice by the 500 ms probe
/// cadence for the first attempt.
pub(crate) fn backoff(attempts: u32) -> Duration {
    Duration::from_secs_f64((2.0 * f64::from(attempts) - 0.2).max(0.0))
}

/// Dials the node's event socket on a fresh task, closing any residual
/// socket with a normal code first.
pub(crate) fn spawn_connect(node: Arc<Node>) {
    let (close_tx, close_rx) = oneshot::channel();
    let mut state = node.socket.lock().unwrap();
    state.started = true;
    state.last_attempt = Some(Instant::now());
    if let Some(residual) = state.close_tx.take() {
        let _ = residual.send(());
    }
    state.close_tx = Some(close_tx);
    state.task = Some(tokio::spawn(run(node.clone(), close_rx)));
}

async fn run(node: Arc<Node>, mut close_rx: oneshot::Receiver<()>) {
    let request = match handshake_request(&node) {
        Ok(request) => request,
        Err(error) => {
            warn!(node = %node.name(), %error, "could not build socket handshake");
            node.on_socket_failure();
            return;
        }
    };

    debug!(node = %node.name(), url = %node.config().ws_url(), "connecting event socket");
    let mut ws = tokio::select! {
        _ = &mut close_rx => return,
        connected = connect_async(request) => match connected {
            Ok((ws, _response)) => ws,
            Err(error) => {
                warn!(node = %node.name(), %error, "event socket connect failed");
                node.on_socket_failure();
                return;
            }
        },
    };

    node.on_socket_open();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = ws
                    .close(Some(CloseFrame { code: CloseCode::Normal, reason: "".into() }))
                    .await;
                return;
            }
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => node.handle_frame(text.as_str()),
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    node.on_remote_close(code);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(node = %node.name(), %error, "event socket errored");
                    node.on_socket_failure();
                    return;
                }
                None => {
                    node.on_socket_failure();
                    return;
                }
            }
        }
    }
}

fn handshake_request(
    node: &Arc<Node>,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = node.config().ws_url().into_client_request()?;
    let headers = request.headers_mut();
    headers.insert("Authorization", header_value(node.config().password())?);
    headers.insert(
        "Client-Name",
        header_value(&format!("jwc/{}", node.instance_name()))?,
    );
    headers.insert("User-Id", header_value(&node.user_id().to_string())?);
    if let Some(session_id) = node.session_id() {
        headers.insert("Session-Id", header_value(&session_id)?);
    }
    Ok(request)
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw).map_err(|e| Error::Config(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly() {
        assert_eq!(backoff(0), Duration::ZERO);
        assert_eq!(backoff(1), Duration::from_secs_f64(1.8));
        assert_eq!(backoff(2), Duration::from_secs_f64(3.8));
        assert_eq!(backoff(10), Duration::from_secs_f64(19.8));
    }

    #[test]
    fn test_shutdown_clears_reconnect_eligibility() {
        let mut state = SocketState::default();
        assert!(state.may_reconnect);
        assert!(state.shutdown().is_none());
        assert!(!state.may_reconnect);
    }
}
