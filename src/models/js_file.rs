//! JavaScript asset model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StageStatus;

/// How a JS asset entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsFileType {
    /// Network- or DOM-loaded script from the desktop pass.
    Normal,
    /// Inline `<script>` body with a synthetic URL.
    Inline,
    /// Script captured during the mobile extraction pass.
    Mobile,
    /// Lazy-loaded bundle chunk discovered by the dechunker.
    Chunk,
}

impl JsFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Inline => "inline",
            Self::Mobile => "mobile",
            Self::Chunk => "chunk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "inline" => Some(Self::Inline),
            "mobile" => Some(Self::Mobile),
            "chunk" => Some(Self::Chunk),
            _ => None,
        }
    }

    /// Inline bodies and chunks cannot themselves be dechunked.
    pub fn skips_dechunking(&self) -> bool {
        matches!(self, Self::Inline | Self::Chunk)
    }
}

/// A JavaScript asset flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsFile {
    pub id: String,
    pub url: String,
    /// SHA-256 of the file content.
    pub hash: String,
    /// The js_file this chunk was discovered in, for `type = chunk`.
    pub parent_id: Option<String>,
    pub has_chunks: bool,
    pub line_count: i64,
    pub file_type: JsFileType,
    pub prettify_status: StageStatus,
    pub sourcemap_status: StageStatus,
    pub analysis_status: StageStatus,
    pub dechunker_status: StageStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields for registering a new JS asset; statuses start `pending`
/// (the create hook immediately advances prettify and sourcemap).
#[derive(Debug, Clone)]
pub struct NewJsFile {
    pub url: String,
    pub hash: String,
    pub parent_id: Option<String>,
    pub has_chunks: bool,
    pub file_type: JsFileType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_round_trip() {
        for t in [
            JsFileType::Normal,
            JsFileType::Inline,
            JsFileType::Mobile,
            JsFileType::Chunk,
        ] {
            assert_eq!(JsFileType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn inline_and_chunk_skip_dechunking() {
        assert!(JsFileType::Inline.skips_dechunking());
        assert!(JsFileType::Chunk.skips_dechunking());
        assert!(!JsFileType::Normal.skips_dechunking());
        assert!(!JsFileType::Mobile.skips_dechunking());
    }
}
