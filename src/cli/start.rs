//! `start` command: install helpers, prepare target storage, and boot the
//! pipeline server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::error;

use crate::config::{self, installation, Settings};
use crate::hooks::PipelineHooks;
use crate::recovery;
use crate::repository::RecordStore;
use crate::server::{self, AppState};
use crate::workers::extraction::BrowserExtractor;
use crate::workers::PoolRegistry;

pub struct StartArgs {
    pub target: String,
    pub port: u16,
    pub storage_dir: Option<PathBuf>,
    pub mobile: bool,
    pub force: bool,
    pub concurrent_browsers: usize,
    pub concurrent_prettify: usize,
    pub concurrent_sourcemaps: usize,
    pub concurrent_analysis: usize,
    pub concurrent_dechunker: usize,
}

pub async fn run(args: StartArgs) -> anyhow::Result<()> {
    installation::run_installation_steps(args.force)
        .await
        .context("installation failed")?;

    let storage_dir = config::setup_target_storage(&args.target, args.storage_dir.as_deref())
        .context("failed to setup target storage")?;

    let mut settings = Settings::for_target(&args.target, storage_dir);
    settings.port = args.port;
    settings.mobile_extraction = args.mobile;
    settings.workers.extraction_workers = args.concurrent_browsers;
    settings.workers.prettify_workers = args.concurrent_prettify;
    settings.workers.sourcemap_workers = args.concurrent_sourcemaps;
    settings.workers.analysis_workers = args.concurrent_analysis;
    settings.workers.dechunker_workers = args.concurrent_dechunker;
    let settings = Arc::new(settings);

    let store = Arc::new(
        RecordStore::open(&settings.database_file()).context("failed to open record store")?,
    );

    let pools = Arc::new(PoolRegistry::new(
        store.clone(),
        settings.clone(),
        Arc::new(BrowserExtractor::new()),
    ));
    pools
        .start_all()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start worker pools: {e}"))?;

    store.install_hooks(Arc::new(PipelineHooks::new(settings.clone(), pools.clone())));

    recovery::spawn_deferred_recovery(store.clone(), settings.clone(), pools.clone());

    let state = AppState {
        store,
        settings: settings.clone(),
    };

    // SIGINT/SIGTERM is a hard stop: durable statuses plus the recovery
    // sweep restore unfinished work on the next boot.
    tokio::select! {
        result = server::serve(state, settings.port) => {
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            std::process::exit(0);
        }
    }
}
