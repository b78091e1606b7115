//! Server configuration: TOML file + CLI overrides.

use panemux_core::{MuxError, MuxResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tmux: TmuxSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_scrollback_size")]
    pub scrollback_size: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            scrollback_size: default_scrollback_size(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// `[agent]` section: what new agent panes get typed into them.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub command: Option<String>,
    /// Older config files named the command this way.
    #[serde(default)]
    pub claude_command: Option<String>,
    #[serde(default)]
    pub args: String,
    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            claude_command: None,
            args: String::new(),
            launch_delay_ms: default_launch_delay_ms(),
        }
    }
}

/// `[tmux]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TmuxSection {
    #[serde(default = "default_tmux_program")]
    pub program: String,
    #[serde(default)]
    pub socket: Option<String>,
}

impl Default for TmuxSection {
    fn default() -> Self {
        Self {
            program: default_tmux_program(),
            socket: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9800
}
fn default_max_sessions() -> usize {
    crate::session::manager::DEFAULT_MAX_SESSIONS
}
fn default_scrollback_size() -> usize {
    crate::session::ring_buffer::DEFAULT_SCROLLBACK_SIZE
}
fn default_data_dir() -> String {
    "~/.panemux".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_launch_delay_ms() -> u64 {
    300
}
fn default_tmux_program() -> String {
    "tmux".to_string()
}
fn default_agent_command() -> String {
    "claude".to_string()
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_sessions: Option<usize>,
    pub scrollback_size: Option<usize>,
    pub agent_command: Option<String>,
    pub data_dir: Option<String>,
    pub tmux_socket: Option<String>,
    pub log_level: Option<String>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub scrollback_size: usize,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub agent_command: String,
    pub agent_args: String,
    pub agent_launch_delay: Duration,
    pub tmux_program: String,
    pub tmux_socket: Option<String>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides. A missing
    /// file means defaults.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> MuxResult<Self> {
        let file_config = match config_path.map(expand_tilde) {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path)?;
                Self::parse(&content)?
            }
            Some(path) => {
                info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };
        Ok(Self::resolve(file_config, overrides))
    }

    pub fn parse(content: &str) -> MuxResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| MuxError::Config(format!("config parse error: {e}")))
    }

    pub fn resolve(file: ConfigFile, overrides: Overrides) -> Self {
        let server = file.server;
        let agent_command = overrides
            .agent_command
            .or(file.agent.command)
            .or(file.agent.claude_command)
            .unwrap_or_else(default_agent_command);
        let data_dir = overrides.data_dir.unwrap_or(server.data_dir);

        Self {
            host: overrides.host.unwrap_or(server.host),
            port: overrides.port.unwrap_or(server.port),
            max_sessions: overrides.max_sessions.unwrap_or(server.max_sessions),
            scrollback_size: overrides.scrollback_size.unwrap_or(server.scrollback_size),
            data_dir: expand_tilde_str(&data_dir),
            log_level: overrides.log_level.unwrap_or(server.log_level),
            agent_command,
            agent_args: file.agent.args,
            agent_launch_delay: Duration::from_millis(file.agent.launch_delay_ms),
            tmux_program: file.tmux.program,
            tmux_socket: overrides.tmux_socket.or(file.tmux.socket),
        }
    }

    /// Create `data_dir` if it does not exist yet.
    pub fn ensure_data_dir(&self) -> MuxResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn addr(&self) -> MuxResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| MuxError::Config(format!("invalid listen address {}:{}: {e}", self.host, self.port)))
    }

    /// Base URL handed to shells so hooks can call back into the workspace.
    pub fn api_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// The string typed into new agent panes.
    pub fn agent_launch_command(&self) -> String {
        let args = self.agent_args.trim();
        if args.is_empty() || self.agent_command.is_empty() {
            self.agent_command.clone()
        } else {
            format!("{} {}", self.agent_command, args)
        }
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    expand_tilde_str("~/.panemux/config.toml")
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = ServerConfig::resolve(ConfigFile::default(), Overrides::default());
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 9800);
        assert_eq!(cfg.max_sessions, 10);
        assert_eq!(cfg.scrollback_size, 65536);
        assert_eq!(cfg.agent_launch_command(), "claude");
        assert_eq!(cfg.agent_launch_delay, Duration::from_millis(300));
        assert_eq!(cfg.tmux_program, "tmux");
        assert!(cfg.tmux_socket.is_none());
        assert_eq!(cfg.api_url(), "http://localhost:9800");
        assert!(cfg.state_file().ends_with(".panemux/state.json"));
        assert_eq!(cfg.addr().unwrap().port(), 9800);
    }

    #[test]
    fn file_values_then_cli_overrides() {
        let file = ServerConfig::parse(
            r#"
            [server]
            port = 9900
            max_sessions = 3
            data_dir = "/var/lib/panemux"

            [agent]
            command = "agent"
            args = "--go"
            launch_delay_ms = 50

            [tmux]
            socket = "iso"
            "#,
        )
        .unwrap();
        let cfg = ServerConfig::resolve(
            file,
            Overrides {
                port: Some(9901),
                ..Overrides::default()
            },
        );
        assert_eq!(cfg.port, 9901);
        assert_eq!(cfg.max_sessions, 3);
        assert_eq!(cfg.state_file(), PathBuf::from("/var/lib/panemux/state.json"));
        assert_eq!(cfg.agent_launch_command(), "agent --go");
        assert_eq!(cfg.agent_launch_delay, Duration::from_millis(50));
        assert_eq!(cfg.tmux_socket.as_deref(), Some("iso"));
    }

    #[test]
    fn legacy_claude_command_is_honoured() {
        let file = ServerConfig::parse("[agent]\nclaude_command = \"claude --resume\"\n").unwrap();
        let cfg = ServerConfig::resolve(file.clone(), Overrides::default());
        assert_eq!(cfg.agent_launch_command(), "claude --resume");

        let cfg = ServerConfig::resolve(
            file,
            Overrides {
                agent_command: Some(String::new()),
                ..Overrides::default()
            },
        );
        assert_eq!(cfg.agent_launch_command(), "");
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            ServerConfig::parse("[server]\nport = \"high\""),
            Err(MuxError::Config(_))
        ));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(
            Some(&dir.path().join("absent.toml")),
            Overrides {
                data_dir: Some(dir.path().join("data").display().to_string()),
                ..Overrides::default()
            },
        )
        .unwrap();
        cfg.ensure_data_dir().unwrap();
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde_str("~/x");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("x"));
        }
        assert_eq!(expand_tilde_str("/abs"), PathBuf::from("/abs"));
    }
}
