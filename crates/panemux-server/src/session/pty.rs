//! PTY wrapper using portable-pty.
//!
//! Opens a pseudo-terminal running a given program in a working directory and
//! hands back the master reader separately so a single fan-out task can own it.

use panemux_core::{MuxError, MuxResult};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Initial window size before the first viewer reports its own.
const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// Program and arguments a pane runs on its pty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A managed PTY instance. Every handle is released at most once.
pub struct PtyHandle {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Kept for resize; dropping it closes the master side.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
}

impl PtyHandle {
    /// Spawn `launch` on a new pty.
    ///
    /// The child sees the current environment plus `TERM=xterm-256color` plus
    /// `env`. Returns the handle and the master reader.
    pub fn spawn(
        launch: &LaunchCommand,
        work_dir: &Path,
        env: &HashMap<String, String>,
    ) -> MuxResult<(Self, Box<dyn Read + Send>)> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| MuxError::StartFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&launch.program);
        cmd.args(&launch.args);
        cmd.cwd(work_dir);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MuxError::StartFailed(format!("failed to spawn {}: {e}", launch.program)))?;
        // The slave must not stay open here or reads never see EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| MuxError::StartFailed(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| MuxError::StartFailed(format!("failed to take PTY writer: {e}")))?;

        info!(program = %launch.program, pid = ?child.process_id(), "PTY spawned");

        let handle = Self {
            writer: Mutex::new(Some(writer)),
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(Some(child)),
        };
        Ok((handle, reader))
    }

    /// Write to the PTY input. Blocks while the kernel buffer is full.
    pub fn write_all(&self, data: &[u8]) -> MuxResult<()> {
        let mut writer = lock(&self.writer);
        let writer = writer
            .as_mut()
            .ok_or_else(|| MuxError::Transport("PTY writer closed".into()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Resize the PTY. No-op once the master is closed.
    pub fn resize(&self, rows: u16, cols: u16) -> MuxResult<()> {
        let master = lock(&self.master);
        let Some(master) = master.as_ref() else {
            return Ok(());
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MuxError::Transport(format!("PTY resize failed: {e}")))?;
        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    /// Close the master side and hand back the child for [`reap`].
    /// `None` once already detached.
    pub fn detach(&self) -> Option<Box<dyn Child + Send + Sync>> {
        lock(&self.writer).take();
        lock(&self.master).take();
        lock(&self.child).take()
    }
}

/// Kill the child unless it already exited, then wait for it.
///
/// Blocking: the kill can wait for the child to honour SIGHUP before
/// escalating. Call from a blocking context.
pub fn reap(mut child: Box<dyn Child + Send + Sync>) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(code = status.exit_code(), "PTY child already exited");
        return;
    }
    if let Err(e) = child.kill() {
        debug!(error = %e, "PTY child kill failed");
    }
    match child.wait() {
        Ok(status) => debug!(code = status.exit_code(), "PTY child reaped"),
        Err(e) => debug!(error = %e, "PTY child wait failed"),
    }
}
