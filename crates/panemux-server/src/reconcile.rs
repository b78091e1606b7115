//! Startup reconciliation between persisted layouts and live multiplexer
//! sessions.
//!
//! Sessions nobody's layout references are orphans and get killed. Sessions
//! that are referenced survive untouched and are reattached lazily when a
//! viewer connects. Referenced panes with no session are started fresh on
//! that first connection.

use crate::tmux::Multiplexer;
use panemux_core::{multiplexer_name, SessionStore};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// What one reconciliation pass found. Every list holds multiplexer names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Live but unreferenced; killed (or attempted).
    pub orphans: Vec<String>,
    /// Live and referenced.
    pub survivors: Vec<String>,
    /// Referenced but not live.
    pub missing: Vec<String>,
}

/// Run once before accepting viewers. Errors are logged, never returned.
pub async fn reconcile(mux: &dyn Multiplexer, store: &dyn SessionStore) -> ReconcileReport {
    let live: BTreeSet<String> = match mux.list_sessions().await {
        Ok(names) => names.into_iter().collect(),
        Err(e) => {
            warn!(error = %e, "cannot list multiplexer sessions; skipping reconciliation");
            return ReconcileReport::default();
        }
    };

    let referenced: BTreeSet<String> = store
        .all_sessions()
        .iter()
        .flat_map(|record| record.layout.collect_leaves())
        .map(|pane_id| multiplexer_name(&pane_id))
        .collect();

    let mut report = ReconcileReport::default();
    for name in live.difference(&referenced) {
        match mux.kill_session(name).await {
            Ok(()) => info!(session = %name, "killed orphaned multiplexer session"),
            Err(e) => warn!(session = %name, error = %e, "failed to kill orphaned session"),
        }
        report.orphans.push(name.clone());
    }
    for name in live.intersection(&referenced) {
        info!(session = %name, "multiplexer session survives; reattaches on first viewer");
        report.survivors.push(name.clone());
    }
    report.missing = referenced.difference(&live).cloned().collect();

    info!(
        orphans = report.orphans.len(),
        survivors = report.survivors.len(),
        missing = report.missing.len(),
        "reconciliation complete"
    );
    report
}
