//! Pane lifecycle management.
//!
//! Tracks every live pane by id, enforces the session cap, and separates
//! *close* (detach the client, keep the shell) from *destroy* (kill the
//! multiplexer session).

use super::pane::PaneSession;
use crate::tmux::SharedMultiplexer;
use panemux_core::{multiplexer_name, MuxError, MuxResult, PaneRole};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default cap on concurrently running panes.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default pause between creating an agent pane and typing the command.
pub const DEFAULT_AGENT_LAUNCH_DELAY: Duration = Duration::from_millis(300);

/// Static policy for a [`PaneManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    pub scrollback_size: usize,
    /// Typed into new agent panes. Empty disables auto-launch.
    pub agent_command: String,
    pub agent_launch_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            scrollback_size: super::ring_buffer::DEFAULT_SCROLLBACK_SIZE,
            agent_command: String::new(),
            agent_launch_delay: DEFAULT_AGENT_LAUNCH_DELAY,
        }
    }
}

type PaneIndex = Arc<RwLock<HashMap<String, Arc<PaneSession>>>>;

/// Manages all live panes.
pub struct PaneManager {
    panes: PaneIndex,
    mux: SharedMultiplexer,
    config: ManagerConfig,
}

impl PaneManager {
    pub fn new(mux: SharedMultiplexer, config: ManagerConfig) -> Self {
        Self {
            panes: Arc::new(RwLock::new(HashMap::new())),
            mux,
            config,
        }
    }

    /// Start a pane attached to its multiplexer session.
    ///
    /// When the multiplexer session did not exist yet and `role` is agent,
    /// the agent command is typed into it after the launch delay.
    pub async fn create(
        &self,
        pane_id: &str,
        work_dir: &Path,
        env: HashMap<String, String>,
        role: PaneRole,
    ) -> MuxResult<Arc<PaneSession>> {
        let mut panes = self.panes.write().await;
        if panes.len() >= self.config.max_sessions {
            return Err(MuxError::CapExceeded(self.config.max_sessions));
        }
        if panes.contains_key(pane_id) {
            return Err(MuxError::AlreadyExists(pane_id.to_string()));
        }

        let name = multiplexer_name(pane_id);
        let is_new = !self.mux.has_session(&name).await;
        let launch = self.mux.attach_command(&name, work_dir);
        let pane = Arc::new(PaneSession::new(
            pane_id,
            work_dir,
            env,
            launch,
            self.config.scrollback_size,
        ));
        pane.start()?;
        panes.insert(pane_id.to_string(), Arc::clone(&pane));
        let count = panes.len();
        drop(panes);

        info!(pane_id, session = %name, is_new, count, "pane created");
        self.spawn_watchdog(Arc::clone(&pane));

        if is_new && role == PaneRole::Agent && !self.config.agent_command.is_empty() {
            self.spawn_agent_launch(name);
        }
        Ok(pane)
    }

    /// Return the live pane, creating it when absent.
    pub async fn get_or_create(
        &self,
        pane_id: &str,
        work_dir: &Path,
        env: HashMap<String, String>,
        role: PaneRole,
    ) -> MuxResult<Arc<PaneSession>> {
        if let Some(pane) = self.get(pane_id).await {
            return Ok(pane);
        }
        match self.create(pane_id, work_dir, env, role).await {
            // Lost a race with another viewer of the same pane.
            Err(MuxError::AlreadyExists(_)) => self
                .get(pane_id)
                .await
                .ok_or_else(|| MuxError::NotFound(pane_id.to_string())),
            other => other,
        }
    }

    pub async fn get(&self, pane_id: &str) -> Option<Arc<PaneSession>> {
        self.panes.read().await.get(pane_id).cloned()
    }

    /// Detach a pane. Its shell keeps running in the multiplexer.
    pub async fn close(&self, pane_id: &str) -> MuxResult<()> {
        let pane = self
            .panes
            .write()
            .await
            .remove(pane_id)
            .ok_or_else(|| MuxError::NotFound(pane_id.to_string()))?;
        pane.close().await;
        Ok(())
    }

    /// Kill a pane's shell. Works on panes no viewer ever attached to.
    pub async fn destroy(&self, pane_id: &str) -> MuxResult<()> {
        let removed = self.panes.write().await.remove(pane_id);
        match removed {
            Some(pane) => pane.destroy(self.mux.as_ref()).await,
            None => {
                let name = multiplexer_name(pane_id);
                if self.mux.has_session(&name).await {
                    self.mux.kill_session(&name).await?;
                    info!(pane_id, session = %name, "killed detached multiplexer session");
                }
                Ok(())
            }
        }
    }

    /// Detach every pane concurrently. Shells survive for the next start.
    pub async fn close_all(&self) {
        let panes: Vec<Arc<PaneSession>> = {
            let mut index = self.panes.write().await;
            index.drain().map(|(_, pane)| pane).collect()
        };
        let count = panes.len();
        futures_util::future::join_all(panes.iter().map(|pane| pane.close())).await;
        info!(count, "all panes closed");
    }

    pub async fn count(&self) -> usize {
        self.panes.read().await.len()
    }

    /// Drop the index entry once the pane's output ends.
    fn spawn_watchdog(&self, pane: Arc<PaneSession>) {
        let panes = Arc::clone(&self.panes);
        tokio::spawn(async move {
            pane.wait_done().await;
            let removed = {
                let mut index = panes.write().await;
                match index.get(pane.pane_id()) {
                    Some(current) if Arc::ptr_eq(current, &pane) => {
                        index.remove(pane.pane_id());
                        true
                    }
                    _ => false,
                }
            };
            if removed {
                info!(pane_id = %pane.pane_id(), "pane exited; removed from index");
            }
            // Reaps the child.
            pane.close().await;
        });
    }

    fn spawn_agent_launch(&self, session: String) {
        let mux = Arc::clone(&self.mux);
        let command = self.config.agent_command.clone();
        let delay = self.config.agent_launch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match mux.send_keys(&session, &command).await {
                Ok(()) => debug!(%session, "agent command sent"),
                Err(e) => warn!(%session, error = %e, "agent launch failed"),
            }
        });
    }
}
