// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use syncable::librarian::Librarian;
use syncable::{FeedParams, Node, SyncConfig, SyncService, User};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "syncable", version, about = "Change tracking for synchronized file storage")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "SYNCABLE_CONFIG", default_value = "syncable.toml")]
    config: PathBuf,

    /// Repository id (defaults to the only configured repository)
    #[arg(long, global = true)]
    repo: Option<String>,

    /// User the scope is resolved for
    #[arg(long, global = true)]
    user: Option<String>,

    /// Group path of the user
    #[arg(long, global = true, default_value = "/")]
    group: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and change tables
    Init,
    /// Run one reconciliation pass against disk
    Reconcile,
    /// Print changes since a sequence number
    Changes {
        #[arg(long, default_value = "0")]
        since: String,
        /// Only report changes below this folder, with paths relative to it
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        flatten: bool,
        /// One record per line, then LAST_SEQ:<n>
        #[arg(long)]
        stream: bool,
    },
    /// Print the bytes used by the scope's files
    Usage,
    /// Index one node, and its subtree for folders
    Index { path: String },
    /// Watch repositories and reconcile periodically until Ctrl-C
    Watch,
}

fn pick_repository(service: &SyncService, id: Option<&str>) -> Result<Arc<syncable::Repository>> {
    if let Some(id) = id {
        return Ok(service.repository(id)?);
    }
    let mut all = service.repositories();
    match (all.next(), all.next()) {
        (Some(only), None) => Ok(Arc::clone(only)),
        (None, _) => anyhow::bail!("no repository configured"),
        _ => anyhow::bail!("several repositories configured, pick one with --repo"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the feed
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let service = Arc::new(SyncService::from_config(&config));
    let user = cli.user.as_ref().map(|id| Arc::new(User::new(id.clone(), cli.group.clone())));
    // Schema creation is idempotent
    service.install()?;

    match cli.command {
        Commands::Init => {
            tracing::info!("Database ready: {}", service.database().path().display());
        }
        Commands::Reconcile => {
            let repo = pick_repository(&service, cli.repo.as_deref())?;
            let report = service.reconcile(&repo, user.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Changes { since, filter, flatten, stream } => {
            let repo = pick_repository(&service, cli.repo.as_deref())?;
            let flatten = flatten.to_string();
            let mut query = vec![("seq_id", since.as_str()), ("flatten", flatten.as_str())];
            if let Some(filter) = filter.as_deref() {
                query.push(("filter", filter));
            }
            if stream {
                query.push(("stream", ""));
            }
            let params = FeedParams::from_query(query).context("missing seq_id")?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            service.changes(&repo, user.as_ref(), params, &mut out)?;
            writeln!(out)?;
        }
        Commands::Usage => {
            let repo = pick_repository(&service, cli.repo.as_deref())?;
            println!("{}", service.space_usage(&repo, user.as_ref())?);
        }
        Commands::Index { path } => {
            let repo = pick_repository(&service, cli.repo.as_deref())?;
            let node = Node::new(repo, user.clone(), &path);
            service.maintainer().try_update_index(None, Some(&node), false)?;
            tracing::info!("Indexed {}", node.path());
        }
        Commands::Watch => watch(service, config, user).await?,
    }
    Ok(())
}

async fn watch(service: Arc<SyncService>, config: SyncConfig, user: Option<Arc<User>>) -> Result<()> {
    let cancel = CancellationToken::new();

    let mut librarian = Librarian::new(service.observer(), config.debounce());
    for root in service.watch_roots(user.as_ref()) {
        librarian.add_root(root);
    }
    librarian.start(cancel.clone())?;

    let mut ticker = tokio::time::interval(config.reconcile_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let service = Arc::clone(&service);
                let user = user.clone();
                let pass = tokio::task::spawn_blocking(move || {
                    for repo in service.repositories() {
                        if let Err(e) = service.reconcile(repo, user.as_ref()) {
                            tracing::error!("[Reconciler] Pass over {} failed: {}", repo.id, e);
                        }
                    }
                });
                if let Err(e) = pass.await {
                    tracing::error!("[Reconciler] Pass panicked: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    cancel.cancel();
    tokio::task::spawn_blocking(move || librarian.join()).await?;
    Ok(())
}
