//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each `open` spawns one socket task that connects, reports `Opened`, then
//! multiplexes outbound writes and inbound reads until it is cancelled or the
//! socket ends. Writes are handed to the task through an unbounded channel;
//! acceptance by the channel is the synchronous acknowledgement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tether_core::{Credential, Frame, TetherError};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventSender, Transport, TransportEvent, TransportEventKind};

/// Close code a server uses to say the credential expired.
pub const CLOSE_CODE_AUTH_EXPIRED: u16 = 4001;

struct Socket {
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// WebSocket client transport.
pub struct WsTransport {
    url: String,
    socket: Option<Socket>,
}

impl WsTransport {
    /// Transport for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, epoch: u64, credential: &Credential, events: EventSender) {
        self.close();

        let request = match build_request(&self.url, credential) {
            Ok(r) => r,
            Err(e) => {
                let _ = events.send(TransportEvent::new(epoch, TransportEventKind::OpenFailed(e)));
                return;
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task_open = Arc::clone(&open);
        let task_cancel = cancel.clone();
        let _ = tokio::spawn(async move {
            run_socket(request, epoch, events, outbound_rx, task_open, task_cancel).await;
        });

        self.socket = Some(Socket {
            outbound,
            open,
            cancel,
        });
    }

    fn send(&mut self, frame: &Frame) -> Result<(), TetherError> {
        let socket = self
            .socket
            .as_ref()
            .filter(|s| s.open.load(Ordering::Acquire))
            .ok_or_else(|| TetherError::transport("socket not open"))?;
        let text = frame
            .encode()
            .map_err(|e| TetherError::Protocol(e.to_string()))?;
        socket
            .outbound
            .send(Message::text(text))
            .map_err(|_| TetherError::transport("socket writer has shut down"))
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.open.store(false, Ordering::Release);
            socket.cancel.cancel();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_request(
    url: &str,
    credential: &Credential,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TetherError> {
    let mut request = url.into_client_request().map_err(TetherError::transport)?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
        .map_err(TetherError::transport)?;
    let _ = request.headers_mut().insert(header::AUTHORIZATION, bearer);
    Ok(request)
}

fn classify_connect_error(err: &WsError) -> TetherError {
    match err {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            TetherError::AuthExpired
        }
        other => TetherError::transport(other),
    }
}

async fn run_socket(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    epoch: u64,
    events: EventSender,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let emit = |kind| {
        let _ = events.send(TransportEvent::new(epoch, kind));
    };

    let stream = tokio::select! {
        () = cancel.cancelled() => return,
        result = connect_async(request) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                debug!(epoch, error = %e, "websocket connect failed");
                emit(TransportEventKind::OpenFailed(classify_connect_error(&e)));
                return;
            }
        },
    };

    let (mut write, mut read) = stream.split();
    open.store(true, Ordering::Release);
    emit(TransportEventKind::Opened);

    let closed_with = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = write.send(message).await {
                    break TetherError::transport(e);
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => emit(TransportEventKind::Frame(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => emit(TransportEventKind::Frame(text)),
                    Err(_) => warn!(epoch, len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    break if code == Some(CLOSE_CODE_AUTH_EXPIRED) {
                        TetherError::AuthExpired
                    } else {
                        TetherError::transport(format!("closed by server (code {code:?})"))
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break TetherError::transport(e),
                None => break TetherError::transport("stream ended"),
            },
        }
    };

    open.store(false, Ordering::Release);
    emit(TransportEventKind::Closed(closed_with));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_bearer_token() {
        let request = build_request("ws://127.0.0.1:9/ws", &Credential::from("abc")).unwrap();
        assert_eq!(
            request.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = build_request("not a url", &Credential::from("abc")).unwrap_err();
        assert_eq!(err.code(), "TRANSPORT");
    }

    #[test]
    fn send_before_open_fails() {
        let mut transport = WsTransport::new("ws://127.0.0.1:9/ws");
        let err = transport.send(&Frame::ping()).unwrap_err();
        assert_eq!(err, TetherError::transport("socket not open"));
    }

    #[tokio::test]
    async fn unreachable_server_reports_open_failed() {
        // Port 9 (discard) is not listening on loopback in test environments.
        let mut transport = WsTransport::new("ws://127.0.0.1:9/ws");
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(3, &Credential::from("abc"), tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.epoch, 3);
        assert!(matches!(event.kind, TransportEventKind::OpenFailed(_)));
    }
}
