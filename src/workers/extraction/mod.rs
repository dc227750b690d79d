//! Extraction stage: drive a browser over an endpoint, capture the rendered
//! HTML plus every reachable JS asset, and register them for the rest of the
//! pipeline.

mod browser;
pub mod html;

pub use browser::BrowserExtractor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use super::pool::JobHandler;
use crate::config::Settings;
use crate::models::{Endpoint, JsFileType, NewJsFile, StageStatus};
use crate::repository::RecordStore;
use crate::storage;
use crate::utils::hash;

/// Where a captured JS resource came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSource {
    /// Intercepted network response.
    Network,
    /// `<script src>` resolved through the browser's resource cache.
    Dom,
    /// Inline `<script>` body.
    Inline,
}

/// One captured JavaScript asset.
#[derive(Debug, Clone)]
pub struct JsResource {
    pub url: String,
    pub content: String,
    pub source: ResourceSource,
}

/// Options for one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    pub headers: HashMap<String, String>,
    pub mobile: bool,
}

/// Rendered page plus the network/DOM scripts captured while loading it.
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    pub html: String,
    pub resources: Vec<JsResource>,
}

/// Seam between the extraction stage and the browser. The production
/// implementation is [`BrowserExtractor`]; tests substitute scripted ones.
#[async_trait]
pub trait JsExtractor: Send + Sync {
    async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<PageCapture>;
}

/// Job: one endpoint whose `extraction_status` is already `processing`.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub endpoint: Endpoint,
}

/// Handler running extraction jobs against the record store.
pub struct ExtractionHandler {
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
    extractor: Arc<dyn JsExtractor>,
}

impl ExtractionHandler {
    pub fn new(
        store: Arc<RecordStore>,
        settings: Arc<Settings>,
        extractor: Arc<dyn JsExtractor>,
    ) -> Self {
        Self {
            store,
            settings,
            extractor,
        }
    }

    async fn mark_failed(&self, endpoint: &mut Endpoint) {
        endpoint.extraction_status = StageStatus::Failed;
        if let Err(e) = self.store.save_endpoint(endpoint).await {
            error!("Failed to mark endpoint {} as failed: {}", endpoint.url, e);
        }
    }

    /// Run one pass (desktop or mobile) and return the captured page with
    /// inline scripts folded into the resource list.
    async fn capture_pass(&self, endpoint: &Endpoint, mobile: bool) -> Result<PageCapture> {
        let options = ExtractionOptions {
            headers: endpoint.header_map(),
            mobile,
        };

        let mut capture = self.extractor.extract(&endpoint.url, &options).await?;

        for script in html::extract_inline_scripts(&capture.html) {
            match html::inline_js_url(&endpoint.url, script.index) {
                Ok(url) => capture.resources.push(JsResource {
                    url,
                    content: script.content,
                    source: ResourceSource::Inline,
                }),
                Err(e) => warn!("Failed to generate inline JS URL: {}", e),
            }
        }

        Ok(capture)
    }

    /// Persist one pass: write the HTML under its structural hash, register
    /// every captured JS asset (deduplicating by URL or content hash), and
    /// update the endpoint's hash and js_files relation.
    async fn save_pass_results(
        &self,
        endpoint: &mut Endpoint,
        capture: &PageCapture,
        mobile: bool,
    ) -> Result<()> {
        let files_root = self.settings.files_path();

        match storage::save_html_file(&files_root, &endpoint.url, &capture.html) {
            Ok(html_hash) => {
                if mobile {
                    endpoint.mobile_hash = html_hash;
                } else {
                    endpoint.hash = html_hash;
                }
            }
            Err(e) => warn!("Failed to save HTML for {}: {}", endpoint.url, e),
        }

        let mut js_file_ids = endpoint.js_files.clone();
        for resource in &capture.resources {
            let content_hash = hash::sha256_hex(resource.content.as_bytes());

            let existing = self
                .store
                .find_js_file_by_url_or_hash(&resource.url, &content_hash)?;
            if let Some(existing) = existing {
                if !js_file_ids.contains(&existing.id) {
                    js_file_ids.push(existing.id);
                }
                continue;
            }

            if let Err(e) = storage::save_js_file(&files_root, &resource.url, &resource.content) {
                warn!("Failed to store JS body for {}: {}", resource.url, e);
                continue;
            }

            let file_type = match resource.source {
                ResourceSource::Inline => JsFileType::Inline,
                _ if mobile => JsFileType::Mobile,
                _ => JsFileType::Normal,
            };

            match self
                .store
                .create_js_file(NewJsFile {
                    url: resource.url.clone(),
                    hash: content_hash,
                    parent_id: None,
                    has_chunks: false,
                    file_type,
                })
                .await
            {
                Ok(record) => {
                    if !js_file_ids.contains(&record.id) {
                        js_file_ids.push(record.id);
                    }
                }
                Err(e) => warn!("Failed to register JS file {}: {}", resource.url, e),
            }
        }

        endpoint.js_files = js_file_ids;
        self.store.save_endpoint(endpoint).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    type Job = ExtractionJob;

    fn name(&self) -> &'static str {
        "extraction"
    }

    fn job_timeout(&self) -> Duration {
        // Browser time for the desktop pass plus the optional mobile pass.
        self.settings.browser_worker_timeout * 2
    }

    async fn process(&self, worker_id: usize, job: ExtractionJob) {
        let started = std::time::Instant::now();
        let mut endpoint = job.endpoint;
        info!("Extraction worker {} started processing", worker_id);

        let capture = match tokio::time::timeout(
            self.settings.browser_worker_timeout,
            self.capture_pass(&endpoint, false),
        )
        .await
        {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) => {
                error!(
                    "Extraction worker {} failed to process endpoint {}: {}",
                    worker_id, endpoint.url, e
                );
                self.mark_failed(&mut endpoint).await;
                return;
            }
            Err(_) => {
                error!(
                    "Extraction worker {} timed out on endpoint {}",
                    worker_id, endpoint.url
                );
                self.mark_failed(&mut endpoint).await;
                return;
            }
        };

        if let Err(e) = self.save_pass_results(&mut endpoint, &capture, false).await {
            error!(
                "Extraction worker {} failed to save results for {}: {}",
                worker_id, endpoint.url, e
            );
            self.mark_failed(&mut endpoint).await;
            return;
        }

        if self.settings.mobile_extraction {
            // A failed mobile pass degrades to an empty capture rather than
            // failing the endpoint.
            let mobile_capture = tokio::time::timeout(
                self.settings.browser_worker_timeout,
                self.capture_pass(&endpoint, true),
            )
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default();

            if let Err(e) = self
                .save_pass_results(&mut endpoint, &mobile_capture, true)
                .await
            {
                error!(
                    "Extraction worker {} failed to save mobile results for {}: {}",
                    worker_id, endpoint.url, e
                );
                self.mark_failed(&mut endpoint).await;
                return;
            }
        }

        endpoint.extraction_status = StageStatus::Processed;
        if let Err(e) = self.store.save_endpoint(&endpoint).await {
            error!(
                "Extraction worker {} failed to save final record for {}: {}",
                worker_id, endpoint.url, e
            );
        }

        info!(
            "Extraction worker finished in {:?} for {}",
            started.elapsed(),
            endpoint.url
        );
    }
}
