//! Startup recovery sweep.
//!
//! Re-submits every record left in `pending` or `processing` to its stage
//! pool, oldest first. Combined with the hook layer's status discipline this
//! gives at-least-once execution across crashes: duplicate prettify runs are
//! harmless, duplicate sourcemap writes short-circuit on existing files, and
//! duplicate analysis rows are an accepted trade-off. `failed` records are
//! terminal and never re-queued.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Settings;
use crate::repository::RecordStore;
use crate::storage;
use crate::workers::analysis::AnalysisJob;
use crate::workers::dechunker::DechunkerJob;
use crate::workers::extraction::ExtractionJob;
use crate::workers::prettify::{FileType, PrettifyJob, PrettifyTarget};
use crate::workers::sourcemap::SourcemapJob;
use crate::workers::PoolRegistry;

/// Sweep all six (entity, status) pairs and re-queue unfinished work.
/// Returns the number of jobs submitted.
pub async fn recover_pending_jobs(
    store: &RecordStore,
    settings: &Settings,
    pools: &Arc<PoolRegistry>,
) -> usize {
    info!("Starting recovery of pending jobs...");
    let mut recovered = 0usize;

    // 1. Endpoints awaiting extraction.
    match store.endpoints_needing_recovery("extraction_status") {
        Ok(endpoints) => {
            if !endpoints.is_empty() {
                info!("Found {} pending extraction jobs to recover", endpoints.len());
            }
            for endpoint in endpoints {
                match pools.extraction.submit(ExtractionJob { endpoint }).await {
                    Ok(()) => recovered += 1,
                    Err(e) => error!("Failed to queue recovery extraction job: {}", e),
                }
            }
        }
        Err(e) => error!("Error finding pending endpoints: {}", e),
    }

    // 2. Endpoints whose rendered HTML still needs prettifying.
    match store.endpoints_needing_recovery("prettify_status") {
        Ok(endpoints) => {
            if !endpoints.is_empty() {
                info!(
                    "Found {} pending endpoint prettify jobs to recover",
                    endpoints.len()
                );
            }
            for endpoint in endpoints {
                for hash in [endpoint.hash.clone(), endpoint.mobile_hash.clone()] {
                    if hash.is_empty() {
                        continue;
                    }
                    let file_path = match storage::html_file_path(
                        &settings.files_path(),
                        &endpoint.url,
                        &hash,
                    ) {
                        Ok(path) => path,
                        Err(e) => {
                            error!("Failed to get HTML file path for {}: {}", endpoint.url, e);
                            continue;
                        }
                    };
                    let job = PrettifyJob {
                        target: PrettifyTarget::Endpoint(endpoint.clone()),
                        file_path,
                        file_type: FileType::Html,
                    };
                    match pools.prettify.submit(job).await {
                        Ok(()) => recovered += 1,
                        Err(e) => {
                            error!("Failed to queue recovery prettify job for endpoint: {}", e)
                        }
                    }
                }
            }
        }
        Err(e) => error!("Error finding pending endpoint prettify jobs: {}", e),
    }

    // 3. JS files awaiting prettify.
    match store.js_files_needing_recovery("prettify_status") {
        Ok(js_files) => {
            if !js_files.is_empty() {
                info!("Found {} pending JS prettify jobs to recover", js_files.len());
            }
            for js_file in js_files {
                let file_path = match storage::js_file_path(
                    &settings.files_path(),
                    &js_file.url,
                    &js_file.hash,
                ) {
                    Ok(path) => path,
                    Err(e) => {
                        error!("Failed to get JS file path for {}: {}", js_file.url, e);
                        continue;
                    }
                };
                let job = PrettifyJob {
                    target: PrettifyTarget::JsFile(js_file),
                    file_path,
                    file_type: FileType::Js,
                };
                match pools.prettify.submit(job).await {
                    Ok(()) => recovered += 1,
                    Err(e) => error!("Failed to queue recovery prettify job for JS: {}", e),
                }
            }
        }
        Err(e) => error!("Error finding pending JS prettify jobs: {}", e),
    }

    // 4. JS files awaiting sourcemap resolution.
    match store.js_files_needing_recovery("sourcemap_status") {
        Ok(js_files) => {
            if !js_files.is_empty() {
                info!("Found {} pending sourcemap jobs to recover", js_files.len());
            }
            for js_file in js_files {
                match pools.sourcemap.submit(SourcemapJob { js_file }).await {
                    Ok(()) => recovered += 1,
                    Err(e) => error!("Failed to queue recovery sourcemap job: {}", e),
                }
            }
        }
        Err(e) => error!("Error finding pending sourcemap jobs: {}", e),
    }

    // 5. JS files awaiting analysis.
    match store.js_files_needing_recovery("analysis_status") {
        Ok(js_files) => {
            if !js_files.is_empty() {
                info!("Found {} pending analysis jobs to recover", js_files.len());
            }
            for js_file in js_files {
                match pools.analysis.submit(AnalysisJob { js_file }).await {
                    Ok(()) => recovered += 1,
                    Err(e) => error!("Failed to queue recovery analysis job: {}", e),
                }
            }
        }
        Err(e) => error!("Error finding pending analysis jobs: {}", e),
    }

    // 6. JS files awaiting dechunking.
    match store.js_files_needing_recovery("dechunker_status") {
        Ok(js_files) => {
            if !js_files.is_empty() {
                info!("Found {} pending dechunker jobs to recover", js_files.len());
            }
            for js_file in js_files {
                match pools.dechunker.submit(DechunkerJob { js_file }).await {
                    Ok(()) => recovered += 1,
                    Err(e) => error!("Failed to queue recovery dechunker job: {}", e),
                }
            }
        }
        Err(e) => error!("Error finding pending dechunker jobs: {}", e),
    }

    if recovered > 0 {
        info!(
            "Recovery completed: {} total pending jobs queued for processing",
            recovered
        );
    } else {
        info!("No pending jobs found to recover");
    }
    recovered
}

/// Schedule the recovery sweep shortly after bootstrap, once pools and hooks
/// are live.
pub fn spawn_deferred_recovery(
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
    pools: Arc<PoolRegistry>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        recover_pending_jobs(&store, &settings, &pools).await;
    });
}
