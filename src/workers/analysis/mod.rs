//! Analysis stage: run the external analyzer over a prettified JS file and
//! persist its findings.

mod analyzer;

pub use analyzer::{analyzer_report_to_findings, AnalyzerReport};

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use super::pool::JobHandler;
use crate::config::Settings;
use crate::models::{JsFile, NewFinding, StageStatus};
use crate::repository::RecordStore;
use crate::storage;

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub js_file: JsFile,
}

pub struct AnalysisHandler {
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
}

impl AnalysisHandler {
    pub fn new(store: Arc<RecordStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    /// Write this stage's status over a fresh read of the record so sibling
    /// stages' concurrent writes are never clobbered.
    async fn finish(&self, js_file: &mut JsFile, status: StageStatus) {
        if let Ok(Some(current)) = self.store.find_js_file(&js_file.id) {
            *js_file = current;
        }
        js_file.analysis_status = status;
        if let Err(e) = self.store.save_js_file(js_file).await {
            error!("Failed to save analysis status for {}: {}", js_file.url, e);
        }
    }

    /// Invoke the analyzer helper and parse its JSON report.
    async fn analyze_file(&self, file_path: &Path) -> Result<AnalyzerReport> {
        let binary = self.settings.analyzer_binary.as_path();
        if binary.as_os_str().is_empty() {
            bail!("analyzer binary path not configured");
        }
        if !binary.exists() {
            bail!("analyzer binary not found at: {}", binary.display());
        }
        if !file_path.exists() {
            bail!("file does not exist: {}", file_path.display());
        }

        let output = Command::new(binary)
            .arg(file_path)
            .output()
            .await
            .context("failed to run analyzer")?;
        if !output.status.success() {
            return Err(anyhow!(
                "analyzer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        serde_json::from_slice(&output.stdout).context("failed to parse analyzer output")
    }

    /// Persist findings, continuing past individual insert errors.
    fn save_findings(&self, findings: Vec<NewFinding>) -> usize {
        let mut saved = 0;
        for finding in findings {
            match self.store.create_finding(finding) {
                Ok(_) => saved += 1,
                Err(e) => error!("Error saving finding: {}", e),
            }
        }
        saved
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    type Job = AnalysisJob;

    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn process(&self, worker_id: usize, job: AnalysisJob) {
        let mut js_file = job.js_file;

        if js_file.hash.is_empty() || js_file.url.is_empty() {
            error!(
                "Analysis worker {} failed: missing hash or URL for record {}",
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
                    "Analysis worker {} failed to get file path for {}: {}",
                    worker_id, js_file.url, e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        let report = match self.analyze_file(&file_path).await {
            Ok(report) => report,
            Err(e) => {
                error!(
                    "Analysis worker {} failed to analyze {}: {}",
                    worker_id,
                    file_path.display(),
                    e
                );
                self.finish(&mut js_file, StageStatus::Failed).await;
                return;
            }
        };

        let findings = analyzer_report_to_findings(report, &js_file.id);
        let saved = self.save_findings(findings);
        info!(
            "Analysis worker {} saved {} findings for {}",
            worker_id, saved, js_file.url
        );

        self.finish(&mut js_file, StageStatus::Processed).await;
    }
}
