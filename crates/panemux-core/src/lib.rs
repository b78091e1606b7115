//! panemux-core: shared model for the panemux terminal server.
//!
//! Provides the pane layout tree, persisted session records and their
//! migrations, the viewer wire protocol, the session store contract, and the
//! error type used across the workspace.

pub mod error;
pub mod layout;
pub mod protocol;
pub mod session;
pub mod store;

pub use error::{MuxError, MuxResult};
pub use layout::{multiplexer_name, Direction, LayoutNode, Leaf, PaneRole, Split, SESSION_PREFIX};
pub use protocol::{ControlMessage, ViewerRoute};
pub use session::{SessionRecord, StoredSession};
pub use store::SessionStore;
