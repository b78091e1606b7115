//! The terminal multiplexer seam.
//!
//! Panes attach to named multiplexer sessions so shells survive server
//! restarts. Everything the server needs from tmux goes through
//! [`Multiplexer`]; tests substitute an in-memory fake.

use crate::session::LaunchCommand;
use async_trait::async_trait;
use panemux_core::{MuxError, MuxResult, SESSION_PREFIX};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Fail with `MultiplexerAbsent` if the program cannot be run.
    async fn check(&self) -> MuxResult<()>;

    async fn has_session(&self, name: &str) -> bool;

    /// Names of every live session carrying our prefix.
    async fn list_sessions(&self) -> MuxResult<Vec<String>>;

    async fn kill_session(&self, name: &str) -> MuxResult<()>;

    /// Type `keys` into the session followed by Enter.
    async fn send_keys(&self, name: &str, keys: &str) -> MuxResult<()>;

    /// Program and arguments that attach to `name`, creating it in
    /// `work_dir` when absent.
    fn attach_command(&self, name: &str, work_dir: &Path) -> LaunchCommand;
}

pub type SharedMultiplexer = Arc<dyn Multiplexer>;

/// tmux driven through its command line.
#[derive(Debug, Clone)]
pub struct Tmux {
    program: String,
    /// `-L` socket name; isolates our server from the user's own tmux.
    socket: Option<String>,
}

impl Tmux {
    pub fn new(program: impl Into<String>, socket: Option<String>) -> Self {
        Self {
            program: program.into(),
            socket: socket.filter(|s| !s.is_empty()),
        }
    }

    fn base_args(&self) -> Vec<String> {
        match &self.socket {
            Some(socket) => vec!["-L".to_string(), socket.clone()],
            None => Vec::new(),
        }
    }

    async fn run(&self, args: &[&str]) -> MuxResult<std::process::Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.base_args()).args(args);
        cmd.stdin(std::process::Stdio::null());
        debug!(program = %self.program, ?args, "running multiplexer command");
        cmd.output()
            .await
            .map_err(|e| MuxError::MultiplexerAbsent(format!("{}: {e}", self.program)))
    }

    async fn run_checked(&self, args: &[&str]) -> MuxResult<()> {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(MuxError::Other(format!(
            "{} {} failed: {}",
            self.program,
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )))
    }
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new("tmux", None)
    }
}

#[async_trait]
impl Multiplexer for Tmux {
    async fn check(&self) -> MuxResult<()> {
        let output = self.run(&["-V"]).await?;
        if !output.status.success() {
            return Err(MuxError::MultiplexerAbsent(format!(
                "{} -V exited with {}",
                self.program, output.status
            )));
        }
        debug!(version = %String::from_utf8_lossy(&output.stdout).trim(), "multiplexer available");
        Ok(())
    }

    async fn has_session(&self, name: &str) -> bool {
        // `=` asks for an exact match instead of a prefix match.
        let target = format!("={name}");
        match self.run(&["has-session", "-t", &target]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!(error = %e, "has-session failed");
                false
            }
        }
    }

    async fn list_sessions(&self) -> MuxResult<Vec<String>> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        // Non-zero exit means no server is running, hence no sessions.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_session_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn kill_session(&self, name: &str) -> MuxResult<()> {
        let target = format!("={name}");
        self.run_checked(&["kill-session", "-t", &target]).await
    }

    async fn send_keys(&self, name: &str, keys: &str) -> MuxResult<()> {
        // Active pane of the exactly named session.
        let target = format!("={name}:");
        self.run_checked(&["send-keys", "-t", &target, keys, "Enter"]).await
    }

    fn attach_command(&self, name: &str, work_dir: &Path) -> LaunchCommand {
        let mut args = self.base_args();
        args.extend([
            "new-session".to_string(),
            "-A".to_string(),
            "-s".to_string(),
            name.to_string(),
            "-c".to_string(),
            work_dir.display().to_string(),
        ]);
        LaunchCommand::new(self.program.clone(), args)
    }
}

fn parse_session_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(SESSION_PREFIX))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory multiplexer. Attaching runs a plain `sh` on the pty unless
    //! another launch command is given.

    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        sessions: BTreeSet<String>,
        killed: Vec<String>,
        keys: Vec<(String, String)>,
    }

    pub struct FakeMux {
        state: Mutex<State>,
        launch: LaunchCommand,
    }

    impl FakeMux {
        pub fn new() -> Self {
            Self::with_launch(LaunchCommand::new("sh", Vec::<String>::new()))
        }

        /// Attaching runs `launch` instead of `sh`.
        pub fn with_launch(launch: LaunchCommand) -> Self {
            Self {
                state: Mutex::new(State::default()),
                launch,
            }
        }

        pub fn insert_session(&self, name: &str) {
            self.state.lock().unwrap().sessions.insert(name.to_string());
        }

        pub fn sessions(&self) -> Vec<String> {
            self.state.lock().unwrap().sessions.iter().cloned().collect()
        }

        pub fn killed(&self) -> Vec<String> {
            self.state.lock().unwrap().killed.clone()
        }

        pub fn keys(&self) -> Vec<(String, String)> {
            self.state.lock().unwrap().keys.clone()
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMux {
        async fn check(&self) -> MuxResult<()> {
            Ok(())
        }

        async fn has_session(&self, name: &str) -> bool {
            self.state.lock().unwrap().sessions.contains(name)
        }

        async fn list_sessions(&self) -> MuxResult<Vec<String>> {
            Ok(self
                .sessions()
                .into_iter()
                .filter(|s| s.starts_with(SESSION_PREFIX))
                .collect())
        }

        async fn kill_session(&self, name: &str) -> MuxResult<()> {
            let mut state = self.state.lock().unwrap();
            if !state.sessions.remove(name) {
                return Err(MuxError::NotFound(name.to_string()));
            }
            state.killed.push(name.to_string());
            Ok(())
        }

        async fn send_keys(&self, name: &str, keys: &str) -> MuxResult<()> {
            self.state
                .lock()
                .unwrap()
                .keys
                .push((name.to_string(), keys.to_string()));
            Ok(())
        }

        fn attach_command(&self, name: &str, _work_dir: &Path) -> LaunchCommand {
            self.insert_session(name);
            self.launch.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmux_available() -> bool {
        std::process::Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn session_list_keeps_only_prefixed_names() {
        let out = "work\npanemux-a\n  panemux-b  \n\nother-panemux-c\n";
        assert_eq!(parse_session_list(out), vec!["panemux-a", "panemux-b"]);
    }

    #[test]
    fn attach_command_uses_socket_and_work_dir() {
        let tmux = Tmux::new("tmux", Some("test-sock".into()));
        let cmd = tmux.attach_command("panemux-x", Path::new("/srv/repo"));
        assert_eq!(cmd.program, "tmux");
        assert_eq!(
            cmd.args,
            ["-L", "test-sock", "new-session", "-A", "-s", "panemux-x", "-c", "/srv/repo"]
        );

        let plain = Tmux::new("tmux", Some(String::new()));
        assert_eq!(plain.attach_command("n", Path::new("/")).args[0], "new-session");
    }

    #[tokio::test]
    async fn missing_program_is_reported_absent() {
        let tmux = Tmux::new("/definitely/not/tmux", None);
        assert!(matches!(tmux.check().await, Err(MuxError::MultiplexerAbsent(_))));
        assert!(!tmux.has_session("panemux-x").await);
        assert!(matches!(
            tmux.list_sessions().await,
            Err(MuxError::MultiplexerAbsent(_))
        ));
    }

    #[tokio::test]
    async fn real_tmux_session_lifecycle() {
        if !tmux_available() {
            eprintln!("tmux not installed; skipping");
            return;
        }
        let socket = format!("panemux-test-{}", uuid::Uuid::new_v4());
        let tmux = Tmux::new("tmux", Some(socket));
        tmux.check().await.unwrap();
        assert!(tmux.list_sessions().await.unwrap().is_empty());

        let name = "panemux-lifecycle";
        let status = std::process::Command::new("tmux")
            .args(tmux.base_args())
            .args(["new-session", "-d", "-s", name])
            .status()
            .unwrap();
        assert!(status.success());

        assert!(tmux.has_session(name).await);
        assert!(!tmux.has_session("panemux-life").await);
        assert_eq!(tmux.list_sessions().await.unwrap(), vec![name.to_string()]);
        tmux.send_keys(name, "echo hello").await.unwrap();
        tmux.kill_session(name).await.unwrap();
        assert!(!tmux.has_session(name).await);
        assert!(tmux.kill_session(name).await.is_err());
    }
}
