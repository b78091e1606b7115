//! Pane runtime: pty lifecycle, scrollback and the live pane index.

pub mod manager;
pub mod pane;
pub mod pty;
pub mod ring_buffer;

pub use manager::{ManagerConfig, PaneManager};
pub use pane::{PaneSession, PaneState};
pub use pty::{LaunchCommand, PtyHandle};
pub use ring_buffer::RingBuffer;
