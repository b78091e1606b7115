//! Viewer wire protocol.
//!
//! Server → viewer: binary frames of opaque pty output; the first frame after
//! connect carries the scrollback snapshot.
//!
//! Viewer → server: binary frames are raw input for the pty; text frames are
//! JSON control messages. Text frames that do not parse are ignored.

use crate::error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};

/// JSON control message sent by a viewer in a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// `{"type":"resize","rows":40,"cols":120}`
    Resize { rows: u16, cols: u16 },
}

impl ControlMessage {
    /// Parse a text frame. `None` for anything unrecognised.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// The `(session, pane)` pair a viewer connection is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerRoute {
    pub session_id: String,
    pub pane_id: String,
}

impl ViewerRoute {
    /// Parse a request path (query string allowed).
    ///
    /// Accepted forms:
    /// - `/ws/{session_id}/{pane_id}`
    /// - `/sessions/{session_id}/panes/{pane_id}/ws`
    pub fn parse(path: &str) -> MuxResult<Self> {
        let path = path.split('?').next().unwrap_or_default();
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let (session_id, pane_id) = match parts.as_slice() {
            ["ws", session_id, pane_id] => (*session_id, *pane_id),
            ["sessions", session_id, "panes", pane_id, "ws"] => (*session_id, *pane_id),
            _ => {
                return Err(MuxError::Transport(format!(
                    "expected /ws/{{session_id}}/{{pane_id}}, got {path}"
                )))
            }
        };
        Ok(Self {
            session_id: session_id.to_string(),
            pane_id: pane_id.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("/ws/{}/{}", self.session_id, self.pane_id)
    }
}
