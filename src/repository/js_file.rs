//! JS file persistence.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::store::RecordStore;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::{JsFile, JsFileType, NewJsFile, StageStatus};

fn row_to_js_file(row: &Row<'_>) -> rusqlite::Result<JsFile> {
    let file_type: String = row.get("type")?;
    let prettify: String = row.get("prettify_status")?;
    let sourcemap: String = row.get("sourcemap_status")?;
    let analysis: String = row.get("analysis_status")?;
    let dechunker: String = row.get("dechunker_status")?;
    let created_at: String = row.get("created_at")?;
    Ok(JsFile {
        id: row.get("id")?,
        url: row.get("url")?,
        hash: row.get("hash")?,
        parent_id: row.get("parent_id")?,
        has_chunks: row.get("has_chunks")?,
        line_count: row.get("line_count")?,
        file_type: JsFileType::parse(&file_type).unwrap_or(JsFileType::Normal),
        prettify_status: StageStatus::parse(&prettify).unwrap_or(StageStatus::Pending),
        sourcemap_status: StageStatus::parse(&sourcemap).unwrap_or(StageStatus::Pending),
        analysis_status: StageStatus::parse(&analysis).unwrap_or(StageStatus::Pending),
        dechunker_status: StageStatus::parse(&dechunker).unwrap_or(StageStatus::Pending),
        created_at: parse_datetime(&created_at),
    })
}

impl RecordStore {
    /// Register a JS asset. Duplicate registration by URL or content hash is
    /// suppressed: the existing record is returned and no hook fires. The
    /// check and insert run in one immediate transaction so concurrent
    /// extraction passes cannot double-register an asset.
    pub async fn create_js_file(&self, new: NewJsFile) -> Result<JsFile> {
        let record = JsFile {
            id: Uuid::new_v4().to_string(),
            url: new.url,
            hash: new.hash,
            parent_id: new.parent_id,
            has_chunks: new.has_chunks,
            line_count: 0,
            file_type: new.file_type,
            prettify_status: StageStatus::Pending,
            sourcemap_status: StageStatus::Pending,
            analysis_status: StageStatus::Pending,
            dechunker_status: StageStatus::Pending,
            created_at: Utc::now(),
        };

        let inserted = {
            let conn = self.connect()?;
            conn.execute("BEGIN IMMEDIATE", [])?;

            let result: Result<Option<JsFile>> = (|| {
                let existing = conn.query_row(
                    "SELECT * FROM js_files WHERE url = ?1 OR (?2 != '' AND hash = ?2) LIMIT 1",
                    params![record.url, record.hash],
                    row_to_js_file,
                );
                match existing {
                    Ok(existing) => return Ok(Some(existing)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => {}
                    Err(e) => return Err(e.into()),
                }

                conn.execute(
                    "INSERT INTO js_files
                        (id, url, hash, parent_id, has_chunks, line_count, type,
                         prettify_status, sourcemap_status, analysis_status,
                         dechunker_status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        record.id,
                        record.url,
                        record.hash,
                        record.parent_id,
                        record.has_chunks,
                        record.line_count,
                        record.file_type.as_str(),
                        record.prettify_status.as_str(),
                        record.sourcemap_status.as_str(),
                        record.analysis_status.as_str(),
                        record.dechunker_status.as_str(),
                        record.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(None)
            })();

            match &result {
                Ok(_) => {
                    conn.execute("COMMIT", [])?;
                }
                Err(_) => {
                    let _ = conn.execute("ROLLBACK", []);
                }
            }

            match result? {
                Some(existing) => return Ok(existing),
                None => true,
            }
        };

        if inserted {
            if let Some(hooks) = self.hooks() {
                hooks.js_file_created(self, &record).await;
            }
        }
        Ok(record)
    }

    /// Persist js_file mutations and fire the after-update hook.
    pub async fn save_js_file(&self, record: &JsFile) -> Result<()> {
        {
            let conn = self.connect()?;
            let changed = conn.execute(
                "UPDATE js_files SET
                    url = ?2, hash = ?3, parent_id = ?4, has_chunks = ?5,
                    line_count = ?6, type = ?7, prettify_status = ?8,
                    sourcemap_status = ?9, analysis_status = ?10,
                    dechunker_status = ?11
                 WHERE id = ?1",
                params![
                    record.id,
                    record.url,
                    record.hash,
                    record.parent_id,
                    record.has_chunks,
                    record.line_count,
                    record.file_type.as_str(),
                    record.prettify_status.as_str(),
                    record.sourcemap_status.as_str(),
                    record.analysis_status.as_str(),
                    record.dechunker_status.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "js_file",
                    key: record.id.clone(),
                });
            }
        }

        if let Some(hooks) = self.hooks() {
            hooks.js_file_updated(self, record).await;
        }
        Ok(())
    }

    pub fn find_js_file(&self, id: &str) -> Result<Option<JsFile>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM js_files WHERE id = ?1",
            params![id],
            row_to_js_file,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_js_file_by_url(&self, url: &str) -> Result<Option<JsFile>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM js_files WHERE url = ?1 LIMIT 1",
            params![url],
            row_to_js_file,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Find a JS file by either identity key. An empty hash only matches by
    /// URL so unhashed placeholders never collide with each other.
    pub fn find_js_file_by_url_or_hash(&self, url: &str, hash: &str) -> Result<Option<JsFile>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM js_files WHERE url = ?1 OR (?2 != '' AND hash = ?2) LIMIT 1",
            params![url, hash],
            row_to_js_file,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count_js_files(&self) -> Result<i64> {
        let conn = self.connect()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM js_files", [], |row| row.get(0))?)
    }

    /// JS files whose given status field is `pending` or `processing`,
    /// oldest first. Used by the recovery sweep.
    pub fn js_files_needing_recovery(&self, status_field: &str) -> Result<Vec<JsFile>> {
        let sql = match status_field {
            "prettify_status" => {
                "SELECT * FROM js_files
                 WHERE prettify_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            "sourcemap_status" => {
                "SELECT * FROM js_files
                 WHERE sourcemap_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            "analysis_status" => {
                "SELECT * FROM js_files
                 WHERE analysis_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            "dechunker_status" => {
                "SELECT * FROM js_files
                 WHERE dechunker_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            other => {
                return Err(RepositoryError::NotFound {
                    entity: "js_file status field",
                    key: other.to_string(),
                })
            }
        };
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map([], row_to_js_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}
