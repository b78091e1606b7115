//! Persistence contract for session records.
//!
//! The pane core reads every record once at startup and writes back one
//! record per layout mutation. Implementations must make each call atomic.

use crate::error::MuxResult;
use crate::session::SessionRecord;

pub trait SessionStore: Send + Sync {
    /// Snapshot of every record.
    fn all_sessions(&self) -> Vec<SessionRecord>;

    fn get_session(&self, id: &str) -> Option<SessionRecord>;

    fn add_session(&self, record: SessionRecord) -> MuxResult<()>;

    /// Replace the record with the same id. `NotFound` if there is none.
    fn update_session(&self, record: &SessionRecord) -> MuxResult<()>;

    /// `NotFound` if there is no record with this id.
    fn delete_session(&self, id: &str) -> MuxResult<()>;
}
