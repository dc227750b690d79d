//! Worker pools for the five pipeline stages.

pub mod analysis;
pub mod dechunker;
pub mod extraction;
pub mod pool;
pub mod prettify;
pub mod sourcemap;

use std::sync::Arc;

use crate::config::Settings;
use crate::repository::RecordStore;

pub use pool::{JobHandler, SubmitError, WorkerPool};

use analysis::AnalysisHandler;
use dechunker::DechunkerHandler;
use extraction::{ExtractionHandler, JsExtractor};
use prettify::PrettifyHandler;
use sourcemap::SourcemapHandler;

/// The five stage pools, wired at startup and handed to the hook layer so
/// record-store callbacks can submit work without holding individual pool
/// handles.
pub struct PoolRegistry {
    pub extraction: WorkerPool<ExtractionHandler>,
    pub prettify: WorkerPool<PrettifyHandler>,
    pub sourcemap: WorkerPool<SourcemapHandler>,
    pub analysis: WorkerPool<AnalysisHandler>,
    pub dechunker: WorkerPool<DechunkerHandler>,
}

impl PoolRegistry {
    /// Build all five pools from the configured sizes. Pools are created
    /// stopped; call [`PoolRegistry::start_all`].
    pub fn new(
        store: Arc<RecordStore>,
        settings: Arc<Settings>,
        extractor: Arc<dyn JsExtractor>,
    ) -> Self {
        let workers = &settings.workers;
        Self {
            extraction: WorkerPool::new(
                Arc::new(ExtractionHandler::new(
                    store.clone(),
                    settings.clone(),
                    extractor,
                )),
                workers.extraction_workers,
                workers.extraction_queue,
            ),
            prettify: WorkerPool::new(
                Arc::new(PrettifyHandler::new(store.clone(), settings.clone())),
                workers.prettify_workers,
                workers.prettify_queue,
            ),
            sourcemap: WorkerPool::new(
                Arc::new(SourcemapHandler::new(store.clone(), settings.clone())),
                workers.sourcemap_workers,
                workers.sourcemap_queue,
            ),
            analysis: WorkerPool::new(
                Arc::new(AnalysisHandler::new(store.clone(), settings.clone())),
                workers.analysis_workers,
                workers.analysis_queue,
            ),
            dechunker: WorkerPool::new(
                Arc::new(DechunkerHandler::new(store, settings.clone())),
                workers.dechunker_workers,
                workers.dechunker_queue,
            ),
        }
    }

    pub async fn start_all(&self) -> Result<(), SubmitError> {
        self.extraction.start().await?;
        self.prettify.start().await?;
        self.sourcemap.start().await?;
        self.analysis.start().await?;
        self.dechunker.start().await?;
        Ok(())
    }

    /// Stop every pool, draining in-flight jobs. Idempotent.
    pub async fn stop_all(&self) {
        self.extraction.stop().await;
        self.prettify.stop().await;
        self.sourcemap.stop().await;
        self.analysis.stop().await;
        self.dechunker.stop().await;
    }
}
