//! Layout mutations tied to their side effects.
//!
//! Each operation loads the session record, applies a pure layout change,
//! persists it, and creates or destroys shells as needed. One lock
//! serializes all of them, so concurrent edits to a layout are queued.

use crate::session::PaneManager;
use panemux_core::{LayoutNode, MuxError, MuxResult, SessionRecord, SessionStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct PaneService {
    store: Arc<dyn SessionStore>,
    manager: Arc<PaneManager>,
    lock: Mutex<()>,
}

impl PaneService {
    pub fn new(store: Arc<dyn SessionStore>, manager: Arc<PaneManager>) -> Self {
        Self {
            store,
            manager,
            lock: Mutex::new(()),
        }
    }

    fn load(&self, session_id: &str) -> MuxResult<SessionRecord> {
        self.store
            .get_session(session_id)
            .ok_or_else(|| MuxError::NotFound(format!("session {session_id}")))
    }

    fn persist(&self, record: &mut SessionRecord) -> MuxResult<()> {
        record.touch();
        self.store.update_session(record)
    }

    /// Split a pane; the new shell pane starts when a viewer first connects.
    pub async fn split_pane(
        &self,
        session_id: &str,
        pane_id: &str,
        direction: &str,
    ) -> MuxResult<(LayoutNode, String)> {
        let _guard = self.lock.lock().await;
        let mut record = self.load(session_id)?;
        let (layout, new_pane_id) = record.layout.split_pane(pane_id, direction)?;
        record.layout = layout.clone();
        self.persist(&mut record)?;
        info!(session_id, pane_id, %new_pane_id, direction, "pane split");
        Ok((layout, new_pane_id))
    }

    /// Remove a pane from its layout and kill its shell. Closing the last
    /// pane deletes the session; the result is then `(None, true)`.
    pub async fn close_pane(
        &self,
        session_id: &str,
        pane_id: &str,
    ) -> MuxResult<(Option<LayoutNode>, bool)> {
        let _guard = self.lock.lock().await;
        let mut record = self.load(session_id)?;
        let (layout, session_closed) = record.layout.close_leaf(pane_id)?;
        match &layout {
            Some(layout) => {
                record.layout = layout.clone();
                self.persist(&mut record)?;
            }
            None => self.store.delete_session(session_id)?,
        }
        // The layout no longer references the pane, so a failed kill leaves
        // an orphan for the next reconciliation.
        if let Err(e) = self.manager.destroy(pane_id).await {
            warn!(session_id, pane_id, error = %e, "failed to destroy pane");
        }
        info!(session_id, pane_id, session_closed, "pane closed");
        Ok((layout, session_closed))
    }

    pub async fn resize_pane(&self, session_id: &str, pane_id: &str, ratio: f64) -> MuxResult<()> {
        let _guard = self.lock.lock().await;
        let mut record = self.load(session_id)?;
        record.layout.resize(pane_id, ratio)?;
        self.persist(&mut record)
    }

    pub async fn rename_pane(&self, session_id: &str, pane_id: &str, name: &str) -> MuxResult<()> {
        let _guard = self.lock.lock().await;
        let mut record = self.load(session_id)?;
        record.layout.rename(pane_id, name)?;
        self.persist(&mut record)
    }

    /// Kill every pane's shell and delete the record.
    pub async fn delete_session(&self, session_id: &str) -> MuxResult<()> {
        let _guard = self.lock.lock().await;
        let record = self.load(session_id)?;
        self.store.delete_session(session_id)?;
        for pane_id in record.layout.collect_leaves() {
            if let Err(e) = self.manager.destroy(&pane_id).await {
                warn!(session_id, %pane_id, error = %e, "failed to destroy pane");
            }
        }
        info!(session_id, "session deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ManagerConfig;
    use crate::store::JsonFileStore;
    use crate::tmux::fake::FakeMux;
    use crate::tmux::Multiplexer;
    use panemux_core::PaneRole;
    use std::collections::HashMap;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        mux: Arc<FakeMux>,
        store: Arc<JsonFileStore>,
        manager: Arc<PaneManager>,
        service: PaneService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("state.json")).unwrap());
        let mux = Arc::new(FakeMux::new());
        let manager = Arc::new(PaneManager::new(mux.clone(), ManagerConfig::default()));
        let service = PaneService::new(store.clone(), manager.clone());
        Fixture {
            _dir: dir,
            mux,
            store,
            manager,
            service,
        }
    }

    fn add_single_pane_session(fx: &Fixture, pane_id: &str) -> SessionRecord {
        let mut record = SessionRecord::new("proj", "/tmp", PaneRole::Shell);
        record.layout = LayoutNode::leaf(pane_id, PaneRole::Shell);
        fx.store.add_session(record.clone()).unwrap();
        record
    }

    async fn start_pane(fx: &Fixture, pane_id: &str) {
        fx.manager
            .get_or_create(pane_id, Path::new("/tmp"), HashMap::new(), PaneRole::Shell)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn split_resize_then_close_collapses() {
        let fx = fixture();
        let record = add_single_pane_session(&fx, "P1");
        start_pane(&fx, "P1").await;

        let (layout, p2) = fx.service.split_pane(&record.id, "P1", "horizontal").await.unwrap();
        assert_eq!(layout.collect_leaves(), vec!["P1".to_string(), p2.clone()]);
        start_pane(&fx, &p2).await;

        fx.service.resize_pane(&record.id, &p2, 0.7).await.unwrap();
        let stored = fx.store.get_session(&record.id).unwrap();
        match &stored.layout {
            LayoutNode::Split(split) => assert_eq!(split.ratio, 0.7),
            other => panic!("expected split, got {other:?}"),
        }
        assert!(stored.updated_at >= record.updated_at);

        let (layout, closed) = fx.service.close_pane(&record.id, &p2).await.unwrap();
        assert!(!closed);
        assert_eq!(layout, Some(LayoutNode::leaf("P1", PaneRole::Shell)));
        assert!(!fx.mux.has_session(&format!("panemux-{p2}")).await);
        assert!(fx.mux.has_session("panemux-P1").await);
        assert_eq!(
            fx.store.get_session(&record.id).unwrap().layout.collect_leaves(),
            vec!["P1"]
        );
        fx.manager.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closing_last_pane_deletes_session() {
        let fx = fixture();
        let record = add_single_pane_session(&fx, "P1");
        start_pane(&fx, "P1").await;

        let (layout, closed) = fx.service.close_pane(&record.id, "P1").await.unwrap();
        assert!(closed);
        assert!(layout.is_none());
        assert!(fx.store.get_session(&record.id).is_none());
        assert!(!fx.mux.has_session("panemux-P1").await);
        assert_eq!(fx.manager.count().await, 0);
    }

    #[tokio::test]
    async fn rejected_mutations_leave_record_untouched() {
        let fx = fixture();
        let record = add_single_pane_session(&fx, "P1");

        assert!(matches!(
            fx.service.split_pane(&record.id, "P1", "diagonal").await,
            Err(MuxError::BadDirection(_))
        ));
        assert!(matches!(
            fx.service.resize_pane(&record.id, "P1", 0.5).await,
            Err(MuxError::NotInSplit(_))
        ));
        assert!(matches!(
            fx.service.close_pane(&record.id, "nope").await,
            Err(MuxError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.rename_pane("no-session", "P1", "x").await,
            Err(MuxError::NotFound(_))
        ));
        assert_eq!(fx.store.get_session(&record.id).unwrap(), record);
    }

    #[tokio::test]
    async fn rename_and_delete_session() {
        let fx = fixture();
        let record = add_single_pane_session(&fx, "P1");
        fx.mux.insert_session("panemux-P1");
        let (_, p2) = fx.service.split_pane(&record.id, "P1", "vertical").await.unwrap();
        fx.mux.insert_session(&format!("panemux-{p2}"));

        fx.service.rename_pane(&record.id, &p2, "logs").await.unwrap();
        let stored = fx.store.get_session(&record.id).unwrap();
        let (leaf, parent) = stored.layout.find(&p2).unwrap();
        assert_eq!(leaf.display_name.as_deref(), Some("logs"));
        assert!(parent.is_some());

        fx.service.delete_session(&record.id).await.unwrap();
        assert!(fx.store.get_session(&record.id).is_none());
        assert!(fx.mux.sessions().is_empty());
    }
}
