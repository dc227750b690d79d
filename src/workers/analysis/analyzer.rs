//! Analyzer report parsing and conversion into findings.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::NewFinding;

/// The analyzer's stdout: one JSON object with five finding arrays.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyzerReport {
    #[serde(default)]
    pub urls: Vec<UrlFinding>,
    #[serde(default)]
    pub gql: Vec<BasicFinding>,
    #[serde(default)]
    pub domxss: Vec<BasicFinding>,
    #[serde(default)]
    pub events: Vec<BasicFinding>,
    #[serde(default)]
    pub httpapi: Vec<HttpApiFinding>,
}

#[derive(Debug, Deserialize)]
pub struct UrlFinding {
    pub value: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
pub struct BasicFinding {
    pub value: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
    #[serde(default)]
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub struct HttpApiFinding {
    pub value: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub options: Value,
}

/// The analyzer may report line 0 for findings it cannot locate; stored
/// lines are clamped to 1 with the raw value kept under
/// `metadata.original_line`.
fn clamp_line(raw_line: i64) -> i64 {
    raw_line.max(1)
}

/// Convert an analyzer report into finding rows for one js_file.
pub fn analyzer_report_to_findings(report: AnalyzerReport, js_file_id: &str) -> Vec<NewFinding> {
    let mut findings = Vec::new();

    for f in report.urls {
        findings.push(NewFinding {
            finding_type: f.r#type,
            line: clamp_line(f.line),
            column: f.column,
            value: f.value,
            metadata: json!({
                "finding_category": "url",
                "metadata": f.metadata,
                "original_line": f.line,
            }),
            js_file: js_file_id.to_string(),
        });
    }

    for f in report.gql {
        findings.push(NewFinding {
            finding_type: f.r#type,
            line: clamp_line(f.line),
            column: f.column,
            value: f.value,
            metadata: json!({
                "finding_category": "graphql",
                "original_line": f.line,
            }),
            js_file: js_file_id.to_string(),
        });
    }

    for f in report.domxss {
        findings.push(NewFinding {
            finding_type: f.r#type,
            line: clamp_line(f.line),
            column: f.column,
            value: f.value,
            metadata: json!({
                "finding_category": "domxss",
                "security_risk": "high",
                "original_line": f.line,
            }),
            js_file: js_file_id.to_string(),
        });
    }

    for f in report.events {
        findings.push(NewFinding {
            finding_type: f.r#type,
            line: clamp_line(f.line),
            column: f.column,
            value: f.value,
            metadata: json!({
                "finding_category": "event",
                "original_line": f.line,
            }),
            js_file: js_file_id.to_string(),
        });
    }

    for f in report.httpapi {
        let mut metadata = json!({
            "finding_category": "httpapi",
            "original_line": f.line,
        });
        if let Some(map) = metadata.as_object_mut() {
            if !f.url.is_empty() {
                map.insert("url".to_string(), Value::String(f.url));
            }
            if !f.method.is_empty() {
                map.insert("method".to_string(), Value::String(f.method));
            }
            if !f.options.is_null() {
                map.insert("options".to_string(), f.options);
            }
        }
        findings.push(NewFinding {
            finding_type: f.r#type,
            line: clamp_line(f.line),
            column: f.column,
            value: f.value,
            metadata,
            js_file: js_file_id.to_string(),
        });
    }

    findings
}
