//! Data models for the crawl pipeline.

mod endpoint;
mod finding;
mod js_file;

pub use endpoint::{parse_request_headers, Endpoint, NewEndpoint, NewTmpEndpoint, TmpEndpoint};
pub use finding::{Finding, NewFinding};
pub use js_file::{JsFile, JsFileType, NewJsFile};

use serde::{Deserialize, Serialize};

/// Processing status of a pipeline stage for one record.
///
/// Transitions are monotonic: `pending → processing → processed | failed`.
/// `failed` is terminal; the recovery sweep only re-queues `pending` and
/// `processing` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the recovery sweep should re-queue a record in this state.
    pub fn needs_recovery(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
