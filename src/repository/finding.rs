//! Finding persistence.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::store::RecordStore;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::{Finding, NewFinding};

/// Findings larger than this are rejected by the writer.
const MAX_VALUE_BYTES: usize = 50_000;

fn row_to_finding(row: &Row<'_>) -> rusqlite::Result<Finding> {
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    Ok(Finding {
        id: row.get("id")?,
        finding_type: row.get("type")?,
        line: row.get("line")?,
        column: row.get("column")?,
        value: row.get("value")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        js_file: row.get("js_file")?,
        created_at: parse_datetime(&created_at),
    })
}

impl RecordStore {
    /// Insert a finding. Findings are append-only and fire no hooks.
    pub fn create_finding(&self, new: NewFinding) -> Result<Finding> {
        if new.value.len() > MAX_VALUE_BYTES {
            return Err(RepositoryError::ValueTooLarge {
                limit: MAX_VALUE_BYTES,
                actual: new.value.len(),
            });
        }

        let record = Finding {
            id: Uuid::new_v4().to_string(),
            finding_type: new.finding_type,
            line: new.line,
            column: new.column,
            value: new.value,
            metadata: new.metadata,
            js_file: new.js_file,
            created_at: Utc::now(),
        };

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO findings (id, type, line, \"column\", value, metadata, js_file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.finding_type,
                record.line,
                record.column,
                record.value,
                serde_json::to_string(&record.metadata)?,
                record.js_file,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    pub fn findings_for_js_file(&self, js_file_id: &str) -> Result<Vec<Finding>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM findings WHERE js_file = ?1 ORDER BY created_at ASC",
        )?;
        let records = stmt
            .query_map(params![js_file_id], row_to_finding)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
