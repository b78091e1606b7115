//! One live pane: a pty running a multiplexer client, its scrollback, and the
//! viewers subscribed to its output.
//!
//! A single fan-out task reads the pty and copies every chunk into the
//! scrollback and into each viewer's bounded channel. A full channel drops the
//! chunk for that viewer only, so a slow viewer never stalls the shell.

use super::pty::{lock, reap, LaunchCommand, PtyHandle};
use super::ring_buffer::RingBuffer;
use crate::tmux::Multiplexer;
use bytes::Bytes;
use panemux_core::{multiplexer_name, MuxError, MuxResult};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bytes read from the pty per fan-out iteration.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Chunks a viewer may fall behind before its chunks are dropped.
pub const VIEWER_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a pane. `Closed` and `Ended` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    Fresh,
    Running,
    /// Detached by the server; the multiplexer session may live on.
    Closed,
    /// The pty reached EOF or failed; the client process is gone.
    Ended,
}

struct Viewers {
    channels: HashMap<String, mpsc::Sender<Bytes>>,
    state: PaneState,
}

/// Runtime for one interactive shell.
pub struct PaneSession {
    pane_id: String,
    work_dir: PathBuf,
    env: HashMap<String, String>,
    launch: LaunchCommand,
    pty: OnceLock<PtyHandle>,
    scrollback: Mutex<RingBuffer>,
    /// Guards the viewer table together with the lifecycle state.
    viewers: RwLock<Viewers>,
    done_tx: watch::Sender<bool>,
    dropped_chunks: AtomicU64,
}

impl PaneSession {
    pub fn new(
        pane_id: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        env: HashMap<String, String>,
        launch: LaunchCommand,
        scrollback_size: usize,
    ) -> Self {
        Self {
            pane_id: pane_id.into(),
            work_dir: work_dir.into(),
            env,
            launch,
            pty: OnceLock::new(),
            scrollback: Mutex::new(RingBuffer::new(scrollback_size)),
            viewers: RwLock::new(Viewers {
                channels: HashMap::new(),
                state: PaneState::Fresh,
            }),
            done_tx: watch::channel(false).0,
            dropped_chunks: AtomicU64::new(0),
        }
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }

    pub fn multiplexer_name(&self) -> String {
        multiplexer_name(&self.pane_id)
    }

    pub fn state(&self) -> PaneState {
        self.read_viewers().state
    }

    pub fn viewer_count(&self) -> usize {
        self.read_viewers().channels.len()
    }

    /// Chunks dropped across all viewers because their channel was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    pub fn scrollback_len(&self) -> usize {
        lock(&self.scrollback).len()
    }

    fn read_viewers(&self) -> std::sync::RwLockReadGuard<'_, Viewers> {
        self.viewers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_viewers(&self) -> std::sync::RwLockWriteGuard<'_, Viewers> {
        self.viewers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the pty and start the fan-out task. Must be called from within
    /// a tokio runtime.
    pub fn start(self: &Arc<Self>) -> MuxResult<()> {
        let mut viewers = self.write_viewers();
        if viewers.state != PaneState::Fresh {
            return Err(MuxError::StartFailed(format!(
                "pane {} already started",
                self.pane_id
            )));
        }
        let (handle, reader) = PtyHandle::spawn(&self.launch, &self.work_dir, &self.env)?;
        // Cannot already be set: state was Fresh under the lock.
        let _ = self.pty.set(handle);
        viewers.state = PaneState::Running;
        drop(viewers);

        let pane = Arc::clone(self);
        tokio::task::spawn_blocking(move || pane.fan_out(reader));
        info!(pane_id = %self.pane_id, work_dir = %self.work_dir.display(), "pane started");
        Ok(())
    }

    fn fan_out(&self, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(pane_id = %self.pane_id, "pty EOF");
                    break;
                }
                Ok(n) => self.broadcast(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO is how Linux reports the slave side going away.
                    debug!(pane_id = %self.pane_id, error = %e, "pty read ended");
                    break;
                }
            }
        }

        {
            let mut viewers = self.write_viewers();
            if viewers.state == PaneState::Running {
                viewers.state = PaneState::Ended;
            }
            viewers.channels.clear();
        }
        let dropped = self.dropped_chunks();
        info!(pane_id = %self.pane_id, dropped_chunks = dropped, "pane output ended");
        self.done_tx.send_replace(true);
    }

    /// Record a chunk and offer it to every viewer without blocking.
    fn broadcast(&self, chunk: Bytes) {
        // Holding the table lock across the scrollback append keeps
        // `subscribe` from observing a chunk in the snapshot and the channel.
        let viewers = self.read_viewers();
        lock(&self.scrollback).append(&chunk);
        for tx in viewers.channels.values() {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Forward viewer input to the pty.
    pub fn write(&self, data: &[u8]) -> MuxResult<()> {
        if matches!(self.state(), PaneState::Closed | PaneState::Ended) {
            return Err(MuxError::Closed(self.pane_id.clone()));
        }
        let pty = self
            .pty
            .get()
            .ok_or_else(|| MuxError::Closed(self.pane_id.clone()))?;
        pty.write_all(data)
    }

    /// Propagate a viewer's window size. No-op before start.
    pub fn resize(&self, rows: u16, cols: u16) -> MuxResult<()> {
        match self.pty.get() {
            Some(pty) => pty.resize(rows, cols),
            None => Ok(()),
        }
    }

    /// Register a viewer and return its channel plus the scrollback.
    ///
    /// Deliver the snapshot first, then the channel. A repeated `viewer_id`
    /// replaces (and closes) the earlier channel. On a pane that is no longer
    /// running the channel is returned already closed.
    pub fn subscribe(&self, viewer_id: &str) -> (mpsc::Receiver<Bytes>, Vec<u8>) {
        let (tx, rx) = mpsc::channel(VIEWER_CHANNEL_CAPACITY);
        let mut viewers = self.write_viewers();
        let snapshot = lock(&self.scrollback).snapshot();
        match viewers.state {
            PaneState::Fresh | PaneState::Running => {
                viewers.channels.insert(viewer_id.to_string(), tx);
                debug!(pane_id = %self.pane_id, viewer_id, viewers = viewers.channels.len(), "viewer subscribed");
            }
            PaneState::Closed | PaneState::Ended => drop(tx),
        }
        (rx, snapshot)
    }

    /// Remove a viewer, closing its channel. Unknown ids are ignored.
    pub fn unsubscribe(&self, viewer_id: &str) {
        let mut viewers = self.write_viewers();
        if viewers.channels.remove(viewer_id).is_some() {
            debug!(pane_id = %self.pane_id, viewer_id, viewers = viewers.channels.len(), "viewer unsubscribed");
        }
    }

    /// Wait until the fan-out task has finished.
    pub async fn wait_done(&self) {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Detach: close every viewer channel, close the pty and stop the
    /// multiplexer client. The multiplexer's own session keeps running.
    ///
    /// Idempotent. The done signal is raised by the fan-out task once the
    /// pty read returns.
    pub async fn close(&self) {
        {
            let mut viewers = self.write_viewers();
            match viewers.state {
                PaneState::Closed => return,
                PaneState::Fresh | PaneState::Running => viewers.state = PaneState::Closed,
                PaneState::Ended => {}
            }
            viewers.channels.clear();
        }
        info!(pane_id = %self.pane_id, "closing pane");

        let Some(child) = self.pty.get().and_then(PtyHandle::detach) else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || reap(child)).await {
            warn!(pane_id = %self.pane_id, error = %e, "pty reap task failed");
        }
    }

    /// Close, then kill the multiplexer session. The shell is gone afterwards.
    pub async fn destroy(&self, mux: &dyn Multiplexer) -> MuxResult<()> {
        self.close().await;
        let name = self.multiplexer_name();
        if mux.has_session(&name).await {
            mux.kill_session(&name).await?;
            info!(pane_id = %self.pane_id, session = %name, "multiplexer session killed");
        } else {
            warn!(pane_id = %self.pane_id, session = %name, "multiplexer session already gone");
        }
        Ok(())
    }
}
