//! Core server: reconciles on startup, accepts viewers, and pipes each one
//! to its pane.

use crate::config::ServerConfig;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::service::PaneService;
use crate::session::{ManagerConfig, PaneManager, PaneSession};
use crate::store::JsonFileStore;
use crate::tmux::{SharedMultiplexer, Tmux};
use crate::transport::websocket::{self, ViewerConnection, ViewerFrame};
use bytes::Bytes;
use futures_util::StreamExt;
use panemux_core::{ControlMessage, MuxResult, PaneRole, SessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// The panemux server instance.
pub struct MuxServer {
    config: ServerConfig,
    store: Arc<dyn SessionStore>,
    manager: Arc<PaneManager>,
    service: Arc<PaneService>,
    /// Notifies open viewer connections of shutdown.
    shutdown_tx: broadcast::Sender<()>,
}

impl MuxServer {
    /// Production wiring: tmux plus the JSON state file under `data_dir`.
    pub async fn new(config: ServerConfig) -> MuxResult<Self> {
        let mux: SharedMultiplexer = Arc::new(Tmux::new(
            config.tmux_program.clone(),
            config.tmux_socket.clone(),
        ));
        config.ensure_data_dir()?;
        let store: Arc<dyn SessionStore> = Arc::new(JsonFileStore::open(config.state_file())?);
        Self::with_parts(config, mux, store).await
    }

    /// Check the multiplexer is usable, then reconcile its sessions against
    /// the store. A missing multiplexer is fatal.
    pub async fn with_parts(
        config: ServerConfig,
        mux: SharedMultiplexer,
        store: Arc<dyn SessionStore>,
    ) -> MuxResult<Self> {
        mux.check().await?;
        let report: ReconcileReport = reconcile(mux.as_ref(), store.as_ref()).await;
        debug!(?report, "startup reconciliation");

        let manager = Arc::new(PaneManager::new(
            mux,
            ManagerConfig {
                max_sessions: config.max_sessions,
                scrollback_size: config.scrollback_size,
                agent_command: config.agent_launch_command(),
                agent_launch_delay: config.agent_launch_delay,
            },
        ));
        let service = Arc::new(PaneService::new(Arc::clone(&store), Arc::clone(&manager)));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            manager,
            service,
            shutdown_tx,
        })
    }

    pub fn manager(&self) -> &Arc<PaneManager> {
        &self.manager
    }

    pub fn service(&self) -> &Arc<PaneService> {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Bind the viewer listener and start accepting in the background.
    pub async fn listen(self: &Arc<Self>) -> MuxResult<SocketAddr> {
        let (addr, mut ws_rx) =
            websocket::start_listener(self.config.addr()?, Arc::clone(&self.store)).await?;
        let server = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(conn) = ws_rx.recv().await {
                let srv = Arc::clone(&server);
                tokio::spawn(async move {
                    if let Err(e) = srv.handle_viewer(conn).await {
                        warn!(error = %e, "viewer connection error");
                    }
                });
            }
            info!("viewer listener closed");
        });
        info!(%addr, panes = self.manager.count().await, "panemux ready");
        Ok(addr)
    }

    /// Listen and serve until shutdown is requested.
    pub async fn run(self: &Arc<Self>) -> MuxResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.listen().await?;
        let _ = shutdown_rx.recv().await;
        Ok(())
    }

    /// Disconnect viewers and detach every pane. Shells keep running.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.manager.close_all().await;
    }

    async fn handle_viewer(&self, mut conn: ViewerConnection) -> MuxResult<()> {
        let session_id = conn.route.session_id.clone();
        let pane_id = conn.route.pane_id.clone();
        let role = conn
            .session
            .layout
            .find(&pane_id)
            .map(|(leaf, _)| leaf.effective_role())
            .unwrap_or(PaneRole::Shell);
        let env = conn.session.pane_env(&pane_id, &self.config.api_url());

        let pane = match self
            .manager
            .get_or_create(&pane_id, &conn.session.work_dir, env, role)
            .await
        {
            Ok(pane) => pane,
            Err(e) => {
                warn!(%session_id, %pane_id, error = %e, "cannot open pane for viewer");
                websocket::ws_close_with_error(&mut conn.ws_stream, &e).await;
                return Err(e);
            }
        };

        let viewer_id = uuid::Uuid::new_v4().to_string();
        let (mut output, snapshot) = pane.subscribe(&viewer_id);
        info!(
            %session_id,
            %pane_id,
            %viewer_id,
            remote = %conn.remote_addr,
            snapshot_len = snapshot.len(),
            "viewer attached"
        );

        let result = self.viewer_loop(&mut conn, &pane, &mut output, &snapshot).await;
        pane.unsubscribe(&viewer_id);
        info!(%session_id, %pane_id, %viewer_id, "viewer detached");
        result
    }

    async fn viewer_loop(
        &self,
        conn: &mut ViewerConnection,
        pane: &Arc<PaneSession>,
        output: &mut mpsc::Receiver<Bytes>,
        snapshot: &[u8],
    ) -> MuxResult<()> {
        if !snapshot.is_empty() {
            websocket::ws_send_binary(&mut conn.ws_stream, snapshot).await?;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("shutdown signal received, closing viewer");
                    let _ = conn.ws_stream.close(None).await;
                    break;
                }

                chunk = output.recv() => match chunk {
                    Some(chunk) => websocket::ws_send_binary(&mut conn.ws_stream, &chunk).await?,
                    None => {
                        debug!(pane_id = %pane.pane_id(), "pane output closed");
                        let _ = conn.ws_stream.close(None).await;
                        break;
                    }
                },

                msg = conn.ws_stream.next() => match msg {
                    Some(Ok(msg)) => match ViewerFrame::decode(msg) {
                        ViewerFrame::Input(data) => forward_input(pane, data).await,
                        ViewerFrame::Control(ControlMessage::Resize { rows, cols }) => {
                            if let Err(e) = pane.resize(rows, cols) {
                                debug!(pane_id = %pane.pane_id(), error = %e, "resize ignored");
                            }
                        }
                        ViewerFrame::Close => {
                            debug!("viewer closed the connection");
                            break;
                        }
                        ViewerFrame::Ignored => {}
                    },
                    Some(Err(e)) => {
                        debug!(error = %e, "viewer read failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }
}

/// Write viewer input off the async workers; the pty write can block.
/// Failures after close are expected and only logged.
async fn forward_input(pane: &Arc<PaneSession>, data: Bytes) {
    let pane = Arc::clone(pane);
    match tokio::task::spawn_blocking(move || pane.write(&data)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "input dropped"),
        Err(e) => warn!(error = %e, "input task failed"),
    }
}
