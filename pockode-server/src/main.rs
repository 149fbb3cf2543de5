//! Pockode server — exposes an AI coding CLI to browsers over a WebSocket
//! JSON-RPC link, organized by git worktree and persistent chat session.

mod agent;
mod connection;
mod error;
mod files;
mod gitops;
mod handlers;
mod manager;
mod process;
mod process_manager;
mod registry;
mod rpc;
mod scope;
mod server;
mod store;
mod watcher;

use crate::gitops::GitOps;
use crate::handlers::ServerContext;
use crate::manager::WorktreeManager;
use crate::registry::WorktreeRegistry;
use crate::watcher::WorktreeWatcher;
use anyhow::Context;
use clap::Parser;
use pockode_config::{AgentKind, Settings, DEFAULT_PORT};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "pockode-server",
    about = "Mobile-first coding companion server",
    version
)]
struct Cli {
    /// Bearer token clients must present via the `auth` method
    #[arg(long, env = "POCKODE_AUTH_TOKEN")]
    token: String,

    /// Listen host
    #[arg(long, env = "POCKODE_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Listen port
    #[arg(long, env = "POCKODE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Main working directory (the project the agent edits)
    #[arg(long, env = "POCKODE_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Where session indexes and history live (default: ~/.pockode/<project>)
    #[arg(long, env = "POCKODE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds of inactivity before an agent process is closed
    #[arg(long, env = "POCKODE_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    idle_timeout_secs: u64,

    /// Which AI CLI to drive: claude or cursor-agent
    #[arg(long, env = "POCKODE_AGENT", default_value = "claude")]
    agent: AgentKind,

    /// Identity for bootstrapping a git repo in a fresh work dir
    #[arg(long, env = "POCKODE_GIT_USER_NAME")]
    git_user_name: Option<String>,

    /// See --git-user-name
    #[arg(long, env = "POCKODE_GIT_USER_EMAIL")]
    git_user_email: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pockode_server=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    if cli.token.is_empty() {
        anyhow::bail!("auth token must not be empty");
    }

    let work_dir = cli
        .work_dir
        .canonicalize()
        .with_context(|| format!("work dir not found: {}", cli.work_dir.display()))?;

    let mut settings = Settings::new(cli.token, work_dir);
    settings.host = cli.host;
    settings.port = cli.port;
    settings.idle_timeout = Duration::from_secs(cli.idle_timeout_secs);
    settings.agent = cli.agent;
    settings.git_user_name = cli.git_user_name;
    settings.git_user_email = cli.git_user_email;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }
    settings
        .ensure_data_dir()
        .with_context(|| format!("cannot create data dir: {}", settings.data_dir.display()))?;

    let settings = Arc::new(settings);
    let registry = Arc::new(WorktreeRegistry::new(&settings.work_dir)?);

    // Bootstrap a git repository when pointed at a fresh directory and
    // given an identity; otherwise worktree operations stay unavailable.
    if !registry.is_git_repo() {
        match (&settings.git_user_name, &settings.git_user_email) {
            (Some(name), Some(email)) => {
                info!(work_dir = %settings.work_dir.display(), "initializing git repository");
                GitOps::init_repo(&settings.work_dir, name, email)
                    .context("git bootstrap failed")?;
            }
            _ => warn!(
                work_dir = %settings.work_dir.display(),
                "not a git repository; worktree operations will fail"
            ),
        }
    }
    let worktree_watcher = WorktreeWatcher::new(registry.clone());
    worktree_watcher
        .start()
        .context("failed to start worktree watcher")?;
    let manager = WorktreeManager::new(settings.clone(), registry, worktree_watcher);
    let ctx = Arc::new(ServerContext {
        settings: settings.clone(),
        manager: manager.clone(),
    });

    let addr = settings.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!(
        addr = %addr,
        agent = %settings.agent,
        work_dir = %settings.work_dir.display(),
        data_dir = %settings.data_dir.display(),
        "pockode server listening"
    );

    axum::serve(listener, server::router(ctx))
        .with_graceful_shutdown(shutdown_signal(manager))
        .await?;
    Ok(())
}

async fn shutdown_signal(manager: Arc<WorktreeManager>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    manager.shutdown().await;
}
