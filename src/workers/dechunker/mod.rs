//! Dechunker stage: discover lazily-loaded bundle chunks with the external
//! extractor helper, fetch them, and feed them back into the pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::pool::JobHandler;
use crate::config::Settings;
use crate::models::{JsFile, JsFileType, NewJsFile, StageStatus};
use crate::repository::RecordStore;
use crate::storage;
use crate::utils::fetch::AssetFetcher;

#[derive(Debug, Clone)]
pub struct DechunkerJob {
    pub js_file: JsFile,
}

pub struct DechunkerHandler {
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
    fetcher: AssetFetcher,
}

impl DechunkerHandler {
    pub fn new(store: Arc<RecordStore>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            fetcher: AssetFetcher::new(),
        }
    }

    /// Write this stage's status over a fresh read of the record so sibling
    /// stages' concurrent writes are never clobbered.
    async fn finish(&self, js_file: &mut JsFile, status: StageStatus) {
        if let Ok(Some(current)) = self.store.find_js_file(&js_file.id) {
            *js_file = current;
        }
        js_file.dechunker_status = status;
        if let Err(e) = self.store.save_js_file(js_file).await {
            error!("Failed to save dechunker status for {}: {}", js_file.url, e);
        }
    }

    /// Run the extractor helper; its stdout is one absolute chunk URL per
    /// non-empty line.
    async fn extract_chunk_urls(&self, file_path: &Path, base_url: &str) -> Result<Vec<String>> {
        let binary = self.settings.dechunker_binary.as_path();
        if binary.as_os_str().is_empty() {
            bail!("dechunker binary path not configured");
        }
        if !binary.exists() {
            bail!("dechunker binary not found at: {}", binary.display());
        }
        if !file_path.exists() {
            bail!("file does not exist: {}", file_path.display());
        }

        let output = Command::new(binary)
            .arg(file_path)
            .arg("--url")
            .arg(base_url)
            .output()
            .await
            .context("failed to run dechunker")?;
        if !output.status.success() {
            return Err(anyhow!(
                "dechunker exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch each chunk URL and register new js_files for the bodies that
    /// pass the content filters. Individual chunk failures are skipped.
    async fn fetch_and_save_chunks(&self, parent_id: &str, chunk_urls: Vec<String>) {
        let files_root = self.settings.files_path();

        for chunk_url in chunk_urls {
            match self.store.find_js_file_by_url(&chunk_url) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to look up chunk {}: {}", chunk_url, e);
                    continue;
                }
            }

            let asset = match self.fetcher.rate_limited_get(&chunk_url).await {
                Ok(asset) if asset.is_success() => asset,
                Ok(asset) => {
                    error!("Failed to fetch chunk {}: HTTP {}", chunk_url, asset.status);
                    continue;
                }
                Err(e) => {
                    error!("Failed to fetch chunk {}: {}", chunk_url, e);
                    continue;
                }
            };

            if !asset.content_type.contains("javascript")
                && !asset.content_type.contains("text/plain")
            {
                debug!(
                    "Skipping chunk {} with incorrect content type: {}",
                    chunk_url, asset.content_type
                );
                continue;
            }

            let content = asset.body_string();
            let trimmed = content.trim_start();
            if trimmed.starts_with("<!DOCTYPE html>") || trimmed.starts_with("<html>") {
                debug!("Skipping chunk {} because it appears to be HTML", chunk_url);
                continue;
            }
            if content.is_empty() {
                error!("Failed to fetch chunk {}: empty content", chunk_url);
                continue;
            }

            let content_hash = match storage::save_js_file(&files_root, &chunk_url, &content) {
                Ok(hash) => hash,
                Err(e) => {
                    error!("Failed to store chunk body {}: {}", chunk_url, e);
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .create_js_file(NewJsFile {
                    url: chunk_url.clone(),
                    hash: content_hash,
                    parent_id: Some(parent_id.to_string()),
                    has_chunks: false,
                    file_type: JsFileType::Chunk,
                })
                .await
            {
                error!("Error saving chunk JS file record for {}: {}", chunk_url, e);
            }
        }
    }
}

#[async_trait]
impl JobHandler for DechunkerHandler {
    type Job = DechunkerJob;

    fn name(&self) -> &'static str {
        "dechunker"
    }

    async fn process(&self, worker_id: usize, job: DechunkerJob) {
        let mut js_file = job.js_file;

        if js_file.hash.is_empty() || js_file.url.is_empty() {
            error!(
                "Dechunker worker {} failed: missing hash or URL for record {}",
                worker_id, js_file.id
            );
            self.finish(&mut js_file, StageStatus::Failed).await;
            return;
        }

        let file_path = match storage::js_file_path(
            &self.settings.files_path(),
            &js_file.url,
            &js_file.hash,
        ) {
            Ok(path) => path,
            Err(e) => {
                error!(
                    "Dechunker worker {} failed to get file path for {}: {}",
                    worker_id, js_file.url, e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        let chunk_urls = match self.extract_chunk_urls(&file_path, &js_file.url).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(
                    "Dechunker worker {} failed to extract chunks from {}: {}",
                    worker_id,
                    file_path.display(),
                    e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        if !chunk_urls.is_empty() {
            info!(
                "Found {} potential chunk URLs for {}",
                chunk_urls.len(),
                js_file.url
            );
            if let Ok(Some(current)) = self.store.find_js_file(&js_file.id) {
                js_file = current;
            }
            js_file.has_chunks = true;
            if let Err(e) = self.store.save_js_file(&js_file).await {
                error!("Failed to flag chunks on {}: {}", js_file.url, e);
            }
            self.fetch_and_save_chunks(&js_file.id, chunk_urls).await;
        }

        // Processed even when no chunks were found.
        self.finish(&mut js_file, StageStatus::Processed).await;
    }
}
