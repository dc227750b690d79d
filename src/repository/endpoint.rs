//! Endpoint and staging-record persistence.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::store::RecordStore;
use super::{parse_datetime, RepositoryError, Result};
use crate::models::{Endpoint, NewEndpoint, NewTmpEndpoint, StageStatus, TmpEndpoint};

fn row_to_tmp_endpoint(row: &Row<'_>) -> rusqlite::Result<TmpEndpoint> {
    let headers: String = row.get("request_headers")?;
    Ok(TmpEndpoint {
        id: row.get("id")?,
        url: row.get("url")?,
        query_string: row.get("query_string")?,
        request_headers: serde_json::from_str(&headers).unwrap_or(serde_json::Value::Null),
        tmp_body: row.get("tmp_body")?,
    })
}

fn row_to_endpoint(row: &Row<'_>) -> rusqlite::Result<Endpoint> {
    let headers: String = row.get("request_headers")?;
    let js_files: String = row.get("js_files")?;
    let extraction: String = row.get("extraction_status")?;
    let prettify: String = row.get("prettify_status")?;
    let created_at: String = row.get("created_at")?;
    Ok(Endpoint {
        id: row.get("id")?,
        url: row.get("url")?,
        query_string: row.get("query_string")?,
        request_headers: serde_json::from_str(&headers).unwrap_or(serde_json::Value::Null),
        hash: row.get("hash")?,
        mobile_hash: row.get("mobile_hash")?,
        extraction_status: StageStatus::parse(&extraction).unwrap_or(StageStatus::Pending),
        prettify_status: StageStatus::parse(&prettify).unwrap_or(StageStatus::Pending),
        js_files: serde_json::from_str(&js_files).unwrap_or_default(),
        created_at: parse_datetime(&created_at),
    })
}

impl RecordStore {
    /// Insert a staging record and fire its after-create hook.
    pub async fn create_tmp_endpoint(&self, new: NewTmpEndpoint) -> Result<TmpEndpoint> {
        let record = TmpEndpoint {
            id: Uuid::new_v4().to_string(),
            url: new.url,
            query_string: new.query_string,
            request_headers: new.request_headers,
            tmp_body: new.tmp_body,
        };

        {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO tmp_endpoints (id, url, query_string, request_headers, tmp_body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.url,
                    record.query_string,
                    serde_json::to_string(&record.request_headers)?,
                    record.tmp_body,
                ],
            )?;
        }

        if let Some(hooks) = self.hooks() {
            hooks.tmp_endpoint_created(self, &record).await;
        }
        Ok(record)
    }

    pub fn delete_tmp_endpoint(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM tmp_endpoints WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Insert a new endpoint with `pending` statuses and fire its
    /// after-create hook.
    pub async fn create_endpoint(&self, new: NewEndpoint) -> Result<Endpoint> {
        let record = Endpoint {
            id: Uuid::new_v4().to_string(),
            url: new.url,
            query_string: new.query_string,
            request_headers: new.request_headers,
            hash: new.hash,
            mobile_hash: String::new(),
            extraction_status: StageStatus::Pending,
            prettify_status: StageStatus::Pending,
            js_files: Vec::new(),
            created_at: Utc::now(),
        };

        {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO endpoints
                    (id, url, query_string, request_headers, hash, mobile_hash,
                     extraction_status, prettify_status, js_files, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.url,
                    record.query_string,
                    serde_json::to_string(&record.request_headers)?,
                    record.hash,
                    record.mobile_hash,
                    record.extraction_status.as_str(),
                    record.prettify_status.as_str(),
                    serde_json::to_string(&record.js_files)?,
                    record.created_at.to_rfc3339(),
                ],
            )?;
        }

        if let Some(hooks) = self.hooks() {
            hooks.endpoint_created(self, &record).await;
        }
        Ok(record)
    }

    /// Persist endpoint mutations and fire the after-update hook.
    pub async fn save_endpoint(&self, record: &Endpoint) -> Result<()> {
        {
            let conn = self.connect()?;
            let changed = conn.execute(
                "UPDATE endpoints SET
                    url = ?2, query_string = ?3, request_headers = ?4, hash = ?5,
                    mobile_hash = ?6, extraction_status = ?7, prettify_status = ?8,
                    js_files = ?9
                 WHERE id = ?1",
                params![
                    record.id,
                    record.url,
                    record.query_string,
                    serde_json::to_string(&record.request_headers)?,
                    record.hash,
                    record.mobile_hash,
                    record.extraction_status.as_str(),
                    record.prettify_status.as_str(),
                    serde_json::to_string(&record.js_files)?,
                ],
            )?;
            if changed == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "endpoint",
                    key: record.id.clone(),
                });
            }
        }

        if let Some(hooks) = self.hooks() {
            hooks.endpoint_updated(self, record).await;
        }
        Ok(())
    }

    pub fn find_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM endpoints WHERE id = ?1",
            params![id],
            row_to_endpoint,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_endpoint_by_hash(&self, hash: &str) -> Result<Option<Endpoint>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM endpoints WHERE hash = ?1 LIMIT 1",
            params![hash],
            row_to_endpoint,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Endpoints whose given status field is `pending` or `processing`,
    /// oldest first. Used by the recovery sweep.
    pub fn endpoints_needing_recovery(&self, status_field: &str) -> Result<Vec<Endpoint>> {
        let sql = match status_field {
            "extraction_status" => {
                "SELECT * FROM endpoints
                 WHERE extraction_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            "prettify_status" => {
                "SELECT * FROM endpoints
                 WHERE prettify_status IN ('pending', 'processing')
                 ORDER BY created_at ASC"
            }
            other => {
                return Err(RepositoryError::NotFound {
                    entity: "endpoint status field",
                    key: other.to_string(),
                })
            }
        };
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map([], row_to_endpoint)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn find_tmp_endpoint(&self, id: &str) -> Result<Option<TmpEndpoint>> {
        let conn = self.connect()?;
        let result = conn.query_row(
            "SELECT * FROM tmp_endpoints WHERE id = ?1",
            params![id],
            row_to_tmp_endpoint,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
