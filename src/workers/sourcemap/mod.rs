//! Sourcemap stage: recover a JS file's original sources to disk.

pub mod resolver;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::pool::JobHandler;
use crate::config::Settings;
use crate::models::{JsFile, StageStatus};
use crate::repository::RecordStore;
use crate::storage;
use crate::utils::fetch::AssetFetcher;
use crate::utils::fs as fsutil;

#[derive(Debug, Clone)]
pub struct SourcemapJob {
    pub js_file: JsFile,
}

pub struct SourcemapHandler {
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
    fetcher: AssetFetcher,
}

impl SourcemapHandler {
    pub fn new(store: Arc<RecordStore>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            fetcher: AssetFetcher::new(),
        }
    }

    /// Write this stage's status. The stored row is re-read first so a
    /// concurrent prettify or analysis write on the same record is never
    /// clobbered by a stale snapshot.
    async fn finish(&self, js_file: &mut JsFile, status: StageStatus) {
        if let Ok(Some(current)) = self.store.find_js_file(&js_file.id) {
            *js_file = current;
        }
        js_file.sourcemap_status = status;
        if let Err(e) = self.store.save_js_file(js_file).await {
            error!("Failed to save sourcemap status for {}: {}", js_file.url, e);
        }
    }
}

#[async_trait]
impl JobHandler for SourcemapHandler {
    type Job = SourcemapJob;

    fn name(&self) -> &'static str {
        "sourcemap"
    }

    async fn process(&self, worker_id: usize, job: SourcemapJob) {
        let mut js_file = job.js_file;

        if js_file.hash.is_empty() || js_file.url.is_empty() {
            error!(
                "Sourcemap worker {} failed: missing hash or URL for record {}",
                worker_id, js_file.id
            );
            self.finish(&mut js_file, StageStatus::Failed).await;
            return;
        }

        let files_root = self.settings.files_path();
        let file_path = match storage::js_file_path(&files_root, &js_file.url, &js_file.hash) {
            Ok(path) => path,
            Err(e) => {
                error!(
                    "Sourcemap worker {} failed to resolve path for {}: {}",
                    worker_id, js_file.url, e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        let js_body = match std::fs::read_to_string(&file_path) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "Sourcemap worker {} failed to read {}: {}",
                    worker_id,
                    file_path.display(),
                    e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        let domain = match fsutil::extract_domain(&js_file.url) {
            Ok(domain) => domain,
            Err(e) => {
                error!(
                    "Sourcemap worker {} failed to extract domain from {}: {}",
                    worker_id, js_file.url, e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        // Absent or invalid sourcemaps are the common case and count as done.
        let sourcemap_bytes =
            match resolver::resolve_sourcemap(&self.fetcher, &js_body, &js_file.url).await {
                Some(bytes) => bytes,
                None => {
                    self.finish(&mut js_file, StageStatus::Processed).await;
                    return;
                }
            };

        let sourcemap = match resolver::parse_sourcemap(&sourcemap_bytes) {
            Ok(map) => map,
            Err(_) => {
                self.finish(&mut js_file, StageStatus::Processed).await;
                return;
            }
        };

        let mut written = 0usize;
        for (i, source_path) in sourcemap.sources.iter().enumerate() {
            let content = match sourcemap.sources_content.get(i) {
                Some(Some(content)) => content,
                _ => continue,
            };

            match storage::save_sourcemap_source(
                &files_root,
                &domain,
                &js_file.hash,
                source_path,
                content,
            ) {
                Ok(Some(_)) => written += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to write source file {}: {}", source_path, e);
                }
            }
        }

        debug!(
            "Sourcemap worker {} recovered {} sources for {}",
            worker_id, written, js_file.url
        );
        self.finish(&mut js_file, StageStatus::Processed).await;
    }
}
