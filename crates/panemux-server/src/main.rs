//! panemux: terminal multiplexing server.
//!
//! Serves tmux-backed panes to WebSocket viewers and bootstraps session
//! records in the shared state file.

use clap::{Parser, Subcommand};
use panemux_core::{PaneRole, SessionRecord, SessionStore};
use panemux_server::config::{default_config_path, Overrides};
use panemux_server::{JsonFileStore, MuxServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// panemux: tmux-backed terminal server
#[derive(Parser, Debug)]
#[command(name = "panemux", version, about = "tmux-backed terminal server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Listen host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Maximum concurrent panes
    #[arg(long, global = true)]
    max_sessions: Option<usize>,

    /// Scrollback kept per pane, in bytes
    #[arg(long, global = true)]
    scrollback_size: Option<usize>,

    /// Command typed into new agent panes (empty disables)
    #[arg(long, global = true)]
    agent_command: Option<String>,

    /// Directory holding state.json
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Private tmux socket name (tmux -L)
    #[arg(long, global = true)]
    tmux_socket: Option<String>,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default)
    Serve,
    /// Add a session with a single pane to the state file
    NewSession {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        feature_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Defaults to the current directory
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[arg(long, default_value = "agent")]
        role: PaneRole,
    },
    /// List stored sessions and their panes
    Sessions,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            max_sessions: self.max_sessions,
            scrollback_size: self.scrollback_size,
            agent_command: self.agent_command.clone(),
            data_dir: self.data_dir.clone(),
            tmux_socket: self.tmux_socket.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = ServerConfig::load(Some(&config_path), cli.overrides());

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let level = match &config {
        Ok(cfg) => cfg.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::NewSession {
            project_id,
            feature_id,
            name,
            work_dir,
            role,
        } => new_session(&config, project_id, feature_id, name, work_dir, role),
        Command::Sessions => list_sessions(&config),
    };
    if let Err(e) = result {
        error!(error = %e, "panemux failed");
        std::process::exit(1);
    }
}

async fn serve(config: ServerConfig) -> panemux_core::MuxResult<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        "starting panemux"
    );

    let server = Arc::new(MuxServer::new(config).await?);

    tokio::select! {
        result = server.run() => result?,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    server.shutdown().await;
    info!("panemux stopped");
    Ok(())
}

fn open_store(config: &ServerConfig) -> panemux_core::MuxResult<JsonFileStore> {
    config.ensure_data_dir()?;
    JsonFileStore::open(config.state_file())
}

fn new_session(
    config: &ServerConfig,
    project_id: String,
    feature_id: Option<String>,
    name: Option<String>,
    work_dir: Option<PathBuf>,
    role: PaneRole,
) -> panemux_core::MuxResult<()> {
    let work_dir = match work_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let work_dir = std::fs::canonicalize(&work_dir).unwrap_or(work_dir);

    let mut record = SessionRecord::new(project_id, work_dir, role);
    record.feature_id = feature_id.filter(|f| !f.is_empty());
    record.name = name.unwrap_or_default();
    let pane_id = record.layout.collect_leaves().join(",");
    let session_id = record.id.clone();

    open_store(config)?.add_session(record)?;
    println!("{session_id} {pane_id}");
    Ok(())
}

fn list_sessions(config: &ServerConfig) -> panemux_core::MuxResult<()> {
    for record in open_store(config)?.all_sessions() {
        println!(
            "{}\t{}\t{}",
            record.id,
            record.work_dir.display(),
            record.layout.collect_leaves().join(",")
        );
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
