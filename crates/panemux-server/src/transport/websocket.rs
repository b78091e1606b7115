//! WebSocket listener using tokio-tungstenite.
//!
//! The request path names the `(session, pane)` a viewer wants. It is checked
//! against the store during the HTTP upgrade so unknown panes are refused with
//! a plain HTTP status instead of an open-then-close socket.

use bytes::Bytes;
use futures_util::SinkExt;
use panemux_core::{ControlMessage, MuxError, MuxResult, SessionRecord, SessionStore, ViewerRoute};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Maximum accepted inbound frame (1 MiB); larger frames are dropped.
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// An upgraded viewer connection whose route was validated.
pub struct ViewerConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub route: ViewerRoute,
    /// Record as it was at upgrade time.
    pub session: SessionRecord,
}

/// Bind and start accepting viewers.
///
/// Returns the bound address (useful with port 0) and a receiver of accepted
/// connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    store: Arc<dyn SessionStore>,
) -> MuxResult<(SocketAddr, mpsc::Receiver<ViewerConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| MuxError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<ViewerConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        let Some(conn) = accept(stream, addr, store.as_ref()).await else {
                            return;
                        };
                        if tx.send(conn).await.is_err() {
                            warn!("WebSocket connection channel closed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

async fn accept(
    stream: TcpStream,
    addr: SocketAddr,
    store: &dyn SessionStore,
) -> Option<ViewerConnection> {
    let mut validated = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match validate_route(store, req.uri().path()) {
            Ok(found) => {
                validated = Some(found);
                Ok(resp)
            }
            Err(e) => {
                debug!(remote = %addr, path = %req.uri().path(), error = %e, "viewer rejected");
                Err(error_response(&e))
            }
        }
    };

    let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    match handshake {
        Ok(ws_stream) => {
            let (route, session) = validated?;
            debug!(remote = %addr, session_id = %route.session_id, pane_id = %route.pane_id, "WebSocket connection accepted");
            Some(ViewerConnection {
                ws_stream,
                remote_addr: addr,
                route,
                session,
            })
        }
        Err(e) => {
            warn!(remote = %addr, error = %e, "WebSocket handshake failed");
            None
        }
    }
}

/// Resolve a request path to its session record, checking the pane is one of
/// the record's leaves.
pub fn validate_route(store: &dyn SessionStore, path: &str) -> MuxResult<(ViewerRoute, SessionRecord)> {
    let route = ViewerRoute::parse(path)?;
    let session = store
        .get_session(&route.session_id)
        .ok_or_else(|| MuxError::NotFound(format!("session {}", route.session_id)))?;
    if !session.layout.has_pane(&route.pane_id) {
        return Err(MuxError::NotFound(format!(
            "pane {} in session {}",
            route.pane_id, route.session_id
        )));
    }
    Ok((route, session))
}

fn error_status(err: &MuxError) -> StatusCode {
    match err {
        // Only path parsing yields a transport error here.
        MuxError::Transport(_) => StatusCode::BAD_REQUEST,
        other => StatusCode::from_u16(other.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn error_response(err: &MuxError) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(err.to_string()));
    *resp.status_mut() = error_status(err);
    resp
}

/// An inbound frame, decoded.
#[derive(Debug, PartialEq)]
pub enum ViewerFrame {
    /// Raw keyboard input for the pty.
    Input(Bytes),
    Control(ControlMessage),
    Close,
    /// Unknown text, pings and pongs, and oversized frames. tungstenite
    /// answers pings itself.
    Ignored,
}

impl ViewerFrame {
    pub fn decode(msg: Message) -> Self {
        match msg {
            Message::Binary(data) => {
                if data.len() > MAX_WS_FRAME_SIZE {
                    warn!(size = data.len(), max = MAX_WS_FRAME_SIZE, "dropping oversized WS frame");
                    return ViewerFrame::Ignored;
                }
                ViewerFrame::Input(Bytes::from(data.to_vec()))
            }
            Message::Text(text) => {
                if text.len() > MAX_WS_FRAME_SIZE {
                    return ViewerFrame::Ignored;
                }
                match ControlMessage::parse(text.as_str()) {
                    Some(ctrl) => ViewerFrame::Control(ctrl),
                    None => ViewerFrame::Ignored,
                }
            }
            Message::Close(_) => ViewerFrame::Close,
            _ => ViewerFrame::Ignored,
        }
    }
}

/// Helper: send a binary message over a WebSocket.
pub async fn ws_send_binary(ws: &mut WebSocketStream<TcpStream>, data: &[u8]) -> MuxResult<()> {
    ws.send(Message::Binary(data.to_vec().into()))
        .await
        .map_err(|e| MuxError::Transport(format!("WS send failed: {e}")))
}

/// Close with 1011 (internal error) and the error text as the reason.
pub async fn ws_close_with_error(ws: &mut WebSocketStream<TcpStream>, err: &MuxError) {
    let mut reason = err.to_string();
    // Close reasons are limited to 123 bytes.
    while reason.len() > 123 {
        reason.pop();
    }
    let frame = CloseFrame {
        code: CloseCode::Error,
        reason: reason.into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!(error = %e, "WS close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;
    use panemux_core::{LayoutNode, PaneRole};

    fn store_with_pane(pane_id: &str) -> (tempfile::TempDir, JsonFileStore, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        let mut record = SessionRecord::new("proj", "/tmp", PaneRole::Shell);
        record.layout = LayoutNode::leaf(pane_id, PaneRole::Shell);
        let id = record.id.clone();
        store.add_session(record).unwrap();
        (dir, store, id)
    }

    #[test]
    fn validate_route_checks_session_and_pane() {
        let (_dir, store, sid) = store_with_pane("P1");

        let (route, record) = validate_route(&store, &format!("/ws/{sid}/P1")).unwrap();
        assert_eq!(route.pane_id, "P1");
        assert_eq!(record.id, sid);
        assert!(validate_route(&store, &format!("/sessions/{sid}/panes/P1/ws")).is_ok());

        let missing_pane = validate_route(&store, &format!("/ws/{sid}/P2")).unwrap_err();
        assert_eq!(error_status(&missing_pane), StatusCode::NOT_FOUND);
        let missing_session = validate_route(&store, "/ws/nope/P1").unwrap_err();
        assert_eq!(error_status(&missing_session), StatusCode::NOT_FOUND);
        let bad_path = validate_route(&store, "/elsewhere").unwrap_err();
        assert_eq!(error_status(&bad_path), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn decode_frames() {
        assert_eq!(
            ViewerFrame::decode(Message::Binary(b"ls\r".to_vec().into())),
            ViewerFrame::Input(Bytes::from_static(b"ls\r"))
        );
        assert_eq!(
            ViewerFrame::decode(Message::Text(r#"{"type":"resize","rows":40,"cols":120}"#.into())),
            ViewerFrame::Control(ControlMessage::Resize { rows: 40, cols: 120 })
        );
        assert_eq!(ViewerFrame::decode(Message::Text("hello".into())), ViewerFrame::Ignored);
        assert_eq!(
            ViewerFrame::decode(Message::Ping(b"p".to_vec().into())),
            ViewerFrame::Ignored
        );
        assert_eq!(ViewerFrame::decode(Message::Close(None)), ViewerFrame::Close);
        let huge = vec![0u8; MAX_WS_FRAME_SIZE + 1];
        assert_eq!(ViewerFrame::decode(Message::Binary(huge.into())), ViewerFrame::Ignored);
    }
}
