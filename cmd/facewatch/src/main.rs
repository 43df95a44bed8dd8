//! facewatch - recognize recurring faces in a detection stream.

mod config;
mod replay;
mod runner;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use giztoy_faceid::{
    Admin, AdminResponse, DeleteRequest, FsArtifacts, JsonFileStore, MergeRequest, PresenceConfig,
    PresenceLog, PresenceTracker, Registry, RenameRequest, Sightings, Watcher,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::replay::{ReplayDetector, ReplaySource};

/// Recognize recurring faces, log presence, and manage identities.
#[derive(Parser, Debug)]
#[command(name = "facewatch")]
#[command(about = "Recognize recurring faces, log presence, and manage identities")]
struct Cli {
    /// Config file (default: ~/.giztoy/facewatch/config.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Identity store JSON file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Face crop directory
    #[arg(long, global = true)]
    faces: Option<PathBuf>,

    /// Last-seen index JSON file
    #[arg(long, global = true)]
    sightings: Option<PathBuf>,

    /// Match threshold (cosine distance)
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a detection recording and log presence
    Watch(WatchArgs),
    /// Serve the admin API only
    Serve {
        /// Listen address (e.g. :5000)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print known identities as JSON
    List,
    /// Rename an identity
    Rename { old: String, new: String },
    /// Delete identities
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Merge identities into a new named identity
    Merge {
        /// Name of the merged identity
        #[arg(long)]
        into: String,
        #[arg(required = true, num_args = 2..)]
        ids: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// JSON Lines recording of detector output
    #[arg(long)]
    replay: PathBuf,

    /// Release frames according to their timestamps
    #[arg(long)]
    realtime: bool,

    /// Presence log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Seconds a face may be unseen before its presence ends
    #[arg(long)]
    timeout: Option<f64>,

    /// Admin listen address
    #[arg(long)]
    listen: Option<String>,

    /// Do not start the admin server
    #[arg(long)]
    no_serve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(p) = args.store {
        cfg.store_path = p;
    }
    if let Some(p) = args.faces {
        cfg.faces_dir = p;
    }
    if let Some(p) = args.sightings {
        cfg.sightings_path = p;
    }
    if let Some(t) = args.threshold {
        cfg.threshold = t;
    }

    match args.command {
        Command::Watch(w) => {
            if let Some(p) = w.log {
                cfg.presence_log = p;
            }
            if let Some(t) = w.timeout {
                cfg.presence_timeout_secs = t;
            }
            if let Some(l) = w.listen {
                cfg.listen = l;
            }
            watch(cfg, w.replay, w.realtime, !w.no_serve).await
        }
        Command::Serve { listen } => {
            if let Some(l) = listen {
                cfg.listen = l;
            }
            let admin = open_admin(&cfg)?;
            server::serve(&cfg.listen, admin, &cfg.faces_dir).await
        }
        Command::List => {
            let admin = open_admin(&cfg)?;
            println!("{}", serde_json::to_string_pretty(&admin.list_identities())?);
            Ok(())
        }
        Command::Rename { old, new } => {
            let admin = open_admin(&cfg)?;
            report(admin.rename(&RenameRequest {
                old_id: old,
                new_id: new,
            }))
        }
        Command::Delete { ids } => {
            let admin = open_admin(&cfg)?;
            report(admin.delete(&DeleteRequest { ids }))
        }
        Command::Merge { into, ids } => {
            let admin = open_admin(&cfg)?;
            report(admin.merge(&MergeRequest { ids, new_id: into }))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_admin(cfg: &Config) -> Result<Admin> {
    let registry = Registry::open(
        giztoy_faceid::Config {
            threshold: cfg.threshold,
        },
        Box::new(JsonFileStore::new(&cfg.store_path)),
        Box::new(FsArtifacts::new(&cfg.faces_dir)),
    )
    .with_context(|| format!("open identity store {}", cfg.store_path.display()))?;
    let sightings = Sightings::open(&cfg.sightings_path);
    Ok(Admin::new(Arc::new(registry), Arc::new(sightings)))
}

fn report(resp: AdminResponse) -> Result<()> {
    if resp.success {
        println!("ok");
        Ok(())
    } else {
        anyhow::bail!(resp.message.unwrap_or_else(|| "operation failed".into()))
    }
}

async fn watch(cfg: Config, replay: PathBuf, realtime: bool, serve: bool) -> Result<()> {
    let admin = open_admin(&cfg)?;
    info!(
        identities = admin.registry().len(),
        threshold = admin.registry().threshold(),
        "starting watch"
    );

    if serve {
        let admin = admin.clone();
        let listen = cfg.listen.clone();
        let faces_dir = cfg.faces_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(&listen, admin, &faces_dir).await {
                error!(error = %e, "admin server stopped");
            }
        });
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let registry = admin.registry().clone();
    let sightings = admin.sightings().clone();
    let tracker = PresenceTracker::with_config(PresenceConfig {
        timeout: cfg.presence_timeout(),
    });
    let log = PresenceLog::new(&cfg.presence_log);

    let summary = tokio::task::spawn_blocking(move || {
        let mut source = ReplaySource::open(&replay, realtime)
            .with_context(|| format!("open recording {}", replay.display()))?;
        let mut watcher = Watcher::new(registry, tracker, Some(log), sightings);
        runner::run(&mut watcher, &mut source, &mut ReplayDetector, &stop)
    })
    .await??;

    info!(
        frames = summary.frames,
        faces = summary.faces,
        created = summary.created,
        presence_records = summary.presence_records,
        "watch finished"
    );
    Ok(())
}
