//! Record-store hooks wiring the pipeline together.
//!
//! Stages never call each other. A stage announces completion by mutating a
//! status field; the hooks below observe those mutations and enqueue the
//! follow-on work. Every action is guarded by a status check so re-fires are
//! harmless, and a full queue leaves the record in `processing` for the
//! recovery sweep on the next boot.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::Settings;
use crate::models::{Endpoint, JsFile, NewEndpoint, StageStatus, TmpEndpoint};
use crate::repository::{RecordHooks, RecordStore};
use crate::storage;
use crate::utils::html_hash;
use crate::workers::extraction::ExtractionJob;
use crate::workers::prettify::{FileType, PrettifyJob, PrettifyTarget};
use crate::workers::sourcemap::SourcemapJob;
use crate::workers::analysis::AnalysisJob;
use crate::workers::dechunker::DechunkerJob;
use crate::workers::PoolRegistry;

pub struct PipelineHooks {
    settings: Arc<Settings>,
    pools: Arc<PoolRegistry>,
}

impl PipelineHooks {
    pub fn new(settings: Arc<Settings>, pools: Arc<PoolRegistry>) -> Self {
        Self { settings, pools }
    }

    /// Submit the HTML prettify job for one rendered page of an endpoint.
    async fn submit_html_prettify(&self, store: &RecordStore, endpoint: &Endpoint, hash: &str) {
        let file_path =
            match storage::html_file_path(&self.settings.files_path(), &endpoint.url, hash) {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to get HTML file path for {}: {}", endpoint.url, e);
                    return;
                }
            };

        let mut flipped = endpoint.clone();
        flipped.prettify_status = StageStatus::Processing;
        if let Err(e) = store.save_endpoint(&flipped).await {
            error!("Failed to flip prettify status for {}: {}", endpoint.url, e);
            return;
        }

        if let Err(e) = self
            .pools
            .prettify
            .submit(PrettifyJob {
                target: PrettifyTarget::Endpoint(flipped),
                file_path,
                file_type: FileType::Html,
            })
            .await
        {
            warn!("Failed to add HTML to prettify queue: {}", e);
        }
    }
}

#[async_trait]
impl RecordHooks for PipelineHooks {
    /// Promote an ingest staging record to an endpoint, deduplicating by the
    /// structural hash of its body.
    async fn tmp_endpoint_created(&self, store: &RecordStore, record: &TmpEndpoint) {
        let hash = if record.tmp_body.is_empty() {
            String::new()
        } else {
            html_hash::structural_hash(&record.tmp_body)
        };

        if !hash.is_empty() {
            match store.find_endpoint_by_hash(&hash) {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to check for existing endpoint: {}", e);
                    return;
                }
            }
        }

        if let Err(e) = store
            .create_endpoint(NewEndpoint {
                url: record.url.clone(),
                query_string: record.query_string.clone(),
                request_headers: record.request_headers.clone(),
                hash,
            })
            .await
        {
            error!("Failed to save endpoint record: {}", e);
            return;
        }

        if let Err(e) = store.delete_tmp_endpoint(&record.id) {
            warn!("Failed to delete tmp endpoint {}: {}", record.id, e);
        }
    }

    /// Freshly created endpoints go straight into extraction.
    async fn endpoint_created(&self, store: &RecordStore, record: &Endpoint) {
        if record.extraction_status != StageStatus::Pending {
            return;
        }

        let mut flipped = record.clone();
        flipped.extraction_status = StageStatus::Processing;
        if let Err(e) = store.save_endpoint(&flipped).await {
            error!("Failed to flip extraction status for {}: {}", record.url, e);
            return;
        }

        if let Err(e) = self
            .pools
            .extraction
            .submit(ExtractionJob { endpoint: flipped })
            .await
        {
            error!("Failed to add endpoint to extraction queue: {}", e);
        }
    }

    /// Once extraction lands, the rendered HTML (desktop and, when present,
    /// mobile) is queued for prettifying.
    async fn endpoint_updated(&self, store: &RecordStore, record: &Endpoint) {
        if record.prettify_status != StageStatus::Pending
            || record.extraction_status != StageStatus::Processed
        {
            return;
        }

        if !record.hash.is_empty() {
            self.submit_html_prettify(store, record, &record.hash).await;
        }
        if !record.mobile_hash.is_empty() {
            let mut current = record.clone();
            current.prettify_status = StageStatus::Processing;
            let mobile_hash = record.mobile_hash.clone();
            self.submit_html_prettify(store, &current, &mobile_hash).await;
        }
    }

    /// New js_files enter prettify and sourcemap immediately; inline bodies
    /// and chunks are born with dechunking already done.
    async fn js_file_created(&self, store: &RecordStore, record: &JsFile) {
        let mut js_file = record.clone();

        if js_file.file_type.skips_dechunking() {
            js_file.dechunker_status = StageStatus::Processed;
        }

        let file_path = match storage::js_file_path(
            &self.settings.files_path(),
            &js_file.url,
            &js_file.hash,
        ) {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to get JS file path for {}: {}", js_file.url, e);
                return;
            }
        };

        js_file.prettify_status = StageStatus::Processing;
        js_file.sourcemap_status = StageStatus::Processing;
        if let Err(e) = store.save_js_file(&js_file).await {
            error!("Failed to advance new js_file {}: {}", js_file.url, e);
            return;
        }

        if let Err(e) = self
            .pools
            .prettify
            .submit(PrettifyJob {
                target: PrettifyTarget::JsFile(js_file.clone()),
                file_path,
                file_type: FileType::Js,
            })
            .await
        {
            warn!("Failed to add JS to prettify queue: {}", e);
        }

        if let Err(e) = self
            .pools
            .sourcemap
            .submit(SourcemapJob { js_file })
            .await
        {
            warn!("Failed to add JS to sourcemap queue: {}", e);
        }
    }

    /// A successful prettify unlocks analysis and dechunking.
    async fn js_file_updated(&self, store: &RecordStore, record: &JsFile) {
        if record.prettify_status != StageStatus::Processed {
            return;
        }

        // Saves below re-fire this hook, so every branch works from the
        // stored row rather than the snapshot that triggered the fire.
        let current = match store.find_js_file(&record.id) {
            Ok(Some(current)) => current,
            _ => return,
        };
        if current.analysis_status == StageStatus::Pending {
            let mut flipped = current;
            flipped.analysis_status = StageStatus::Processing;
            if let Err(e) = store.save_js_file(&flipped).await {
                error!("Failed to flip analysis status for {}: {}", record.url, e);
            } else if let Err(e) = self
                .pools
                .analysis
                .submit(AnalysisJob { js_file: flipped })
                .await
            {
                warn!("Failed to add analysis job for {}: {}", record.url, e);
            }
        }

        let current = match store.find_js_file(&record.id) {
            Ok(Some(current)) => current,
            _ => return,
        };
        if current.dechunker_status == StageStatus::Pending {
            let mut flipped = current;
            flipped.dechunker_status = StageStatus::Processing;
            if let Err(e) = store.save_js_file(&flipped).await {
                error!("Failed to flip dechunker status for {}: {}", record.url, e);
            } else if let Err(e) = self
                .pools
                .dechunker
                .submit(DechunkerJob { js_file: flipped })
                .await
            {
                warn!("Failed to add dechunker job for {}: {}", record.url, e);
            }
        }
    }
}
