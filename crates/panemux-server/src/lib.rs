//! panemux-server: tmux-backed terminal panes streamed to WebSocket viewers.
//!
//! Each pane is a pty running a tmux client attached to a named tmux session,
//! so shells outlive both browser refreshes and server restarts. Viewers get
//! the pane's scrollback on connect, then live output.

pub mod config;
pub mod reconcile;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
pub mod tmux;
pub mod transport;

pub use config::ServerConfig;
pub use reconcile::{reconcile, ReconcileReport};
pub use server::MuxServer;
pub use service::PaneService;
pub use session::{PaneManager, PaneSession};
pub use store::JsonFileStore;
pub use tmux::{Multiplexer, Tmux};
