//! Prettify stage: format HTML and JS files in place with the external
//! prettifier helper, then record the resulting line count.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, warn};

use super::pool::JobHandler;
use crate::config::Settings;
use crate::models::{Endpoint, JsFile, StageStatus};
use crate::repository::RecordStore;

#[derive(Debug, Error)]
pub enum PrettifyError {
    #[error("prettifier binary path not configured")]
    NotConfigured,

    #[error("prettifier binary not found at {0}")]
    NotFound(PathBuf),

    #[error("input file does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("prettifier failed: {0}")]
    CommandFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What kind of file the prettifier is formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Html,
    Js,
}

impl FileType {
    fn flag(&self) -> &'static str {
        match self {
            Self::Html => "--html",
            Self::Js => "--js",
        }
    }
}

/// The record whose `prettify_status` this job owns. `Temp` formats a file
/// with no status tracking at all.
#[derive(Debug, Clone)]
pub enum PrettifyTarget {
    Endpoint(Endpoint),
    JsFile(JsFile),
    Temp,
}

#[derive(Debug, Clone)]
pub struct PrettifyJob {
    pub target: PrettifyTarget,
    pub file_path: PathBuf,
    pub file_type: FileType,
}

pub struct PrettifyHandler {
    store: Arc<RecordStore>,
    settings: Arc<Settings>,
}

impl PrettifyHandler {
    pub fn new(store: Arc<RecordStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    fn prettifier_binary(&self) -> Result<&Path, PrettifyError> {
        let path = self.settings.prettifier_binary.as_path();
        if path.as_os_str().is_empty() {
            return Err(PrettifyError::NotConfigured);
        }
        if !path.exists() {
            return Err(PrettifyError::NotFound(path.to_path_buf()));
        }
        Ok(path)
    }

    /// Run the prettifier on a file in place.
    async fn prettify_file(&self, file_path: &Path, file_type: FileType) -> Result<(), PrettifyError> {
        let binary = self.prettifier_binary()?;
        if !file_path.exists() {
            return Err(PrettifyError::MissingInput(file_path.to_path_buf()));
        }

        let output = Command::new(binary)
            .arg(file_type.flag())
            .arg(file_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PrettifyError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }

    /// Status writes re-read the stored row first: the record's sourcemap
    /// (or, for endpoints, a second HTML pass) may have advanced while this
    /// job ran, and a stale snapshot must not roll that back.
    async fn record_failure(&self, target: &PrettifyTarget) {
        match target {
            PrettifyTarget::Endpoint(endpoint) => {
                let mut current = match self.store.find_endpoint(&endpoint.id) {
                    Ok(Some(current)) => current,
                    _ => endpoint.clone(),
                };
                current.prettify_status = StageStatus::Failed;
                if let Err(e) = self.store.save_endpoint(&current).await {
                    error!("Failed to mark endpoint {} prettify failed: {}", current.url, e);
                }
            }
            PrettifyTarget::JsFile(js_file) => {
                let mut current = match self.store.find_js_file(&js_file.id) {
                    Ok(Some(current)) => current,
                    _ => js_file.clone(),
                };
                current.prettify_status = StageStatus::Failed;
                if let Err(e) = self.store.save_js_file(&current).await {
                    error!("Failed to mark js_file {} prettify failed: {}", current.url, e);
                }
            }
            PrettifyTarget::Temp => {}
        }
    }

    async fn record_success(&self, target: &PrettifyTarget, file_path: &Path) {
        match target {
            PrettifyTarget::Endpoint(endpoint) => {
                let mut current = match self.store.find_endpoint(&endpoint.id) {
                    Ok(Some(current)) => current,
                    _ => endpoint.clone(),
                };
                current.prettify_status = StageStatus::Processed;
                if let Err(e) = self.store.save_endpoint(&current).await {
                    error!("Failed to save prettified endpoint {}: {}", current.url, e);
                }
            }
            PrettifyTarget::JsFile(js_file) => {
                let mut current = match self.store.find_js_file(&js_file.id) {
                    Ok(Some(current)) => current,
                    _ => js_file.clone(),
                };
                match count_lines(file_path) {
                    Ok(lines) => current.line_count = lines,
                    Err(e) => warn!("Failed to count lines in {}: {}", file_path.display(), e),
                }
                current.prettify_status = StageStatus::Processed;
                if let Err(e) = self.store.save_js_file(&current).await {
                    error!("Failed to save prettified js_file {}: {}", current.url, e);
                }
            }
            PrettifyTarget::Temp => {}
        }
    }
}

#[async_trait]
impl JobHandler for PrettifyHandler {
    type Job = PrettifyJob;

    fn name(&self) -> &'static str {
        "prettify"
    }

    async fn process(&self, worker_id: usize, job: PrettifyJob) {
        if job.file_path.as_os_str().is_empty() {
            error!("Prettify worker {} failed: missing file path for job", worker_id);
            self.record_failure(&job.target).await;
            return;
        }

        if let Err(e) = self.prettify_file(&job.file_path, job.file_type).await {
            error!(
                "Prettify worker {} failed to prettify {}: {}",
                worker_id,
                job.file_path.display(),
                e
            );
            self.record_failure(&job.target).await;
            return;
        }

        self.record_success(&job.target, &job.file_path).await;
    }
}

/// Count lines by streaming the file and counting `\n` bytes; a non-newline
/// final byte counts as one more line.
pub fn count_lines(file_path: &Path) -> std::io::Result<i64> {
    use std::io::Read;

    let mut file = std::fs::File::open(file_path)?;
    let mut buf = [0u8; 32 * 1024];
    let mut line_count: i64 = 0;
    let mut last_byte_is_newline = true;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        line_count += buf[..n].iter().filter(|&&b| b == b'\n').count() as i64;
        last_byte_is_newline = buf[n - 1] == b'\n';
    }

    if !last_byte_is_newline {
        line_count += 1;
    }
    Ok(line_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn count_lines_empty_file() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "empty.js", b"");
        assert_eq!(count_lines(&path).unwrap(), 0);
    }

    #[test]
    fn count_lines_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "a.js", b"one\ntwo\n");
        assert_eq!(count_lines(&path).unwrap(), 2);
    }

    #[test]
    fn count_lines_no_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "b.js", b"one\ntwo\nthree");
        assert_eq!(count_lines(&path).unwrap(), 3);
    }

    #[test]
    fn count_lines_single_line() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "c.js", b"alert(1)");
        assert_eq!(count_lines(&path).unwrap(), 1);
    }

    #[test]
    fn file_type_flags() {
        assert_eq!(FileType::Html.flag(), "--html");
        assert_eq!(FileType::Js.flag(), "--js");
    }
}
