//! Viewer transports.

pub mod websocket;

pub use websocket::{start_listener, ViewerConnection, ViewerFrame};
