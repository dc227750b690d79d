//! Security finding model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A security-relevant finding reported by the analyzer for one js_file.
/// Findings are append-only; they are never updated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub finding_type: String,
    /// 1-based line; the analyzer's raw value is preserved in
    /// `metadata.original_line`.
    pub line: i64,
    pub column: i64,
    pub value: String,
    pub metadata: Value,
    pub js_file: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a new finding.
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub finding_type: String,
    pub line: i64,
    pub column: i64,
    pub value: String,
    pub metadata: Value,
    pub js_file: String,
}
