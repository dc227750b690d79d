//! Store handle, schema setup, and hook dispatch.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::Arc;

use super::Result;
use crate::models::{Endpoint, JsFile, TmpEndpoint};

/// Record-store callbacks, wired once at startup.
///
/// Hooks fire after the triggering write has committed, including for writes
/// made from inside other hooks or from workers. Implementations must be
/// idempotent with respect to re-fires: every action is guarded by a status
/// check, and status transitions are monotonic, so dispatch terminates.
#[async_trait]
pub trait RecordHooks: Send + Sync {
    async fn tmp_endpoint_created(&self, store: &RecordStore, record: &TmpEndpoint);
    async fn endpoint_created(&self, store: &RecordStore, record: &Endpoint);
    async fn endpoint_updated(&self, store: &RecordStore, record: &Endpoint);
    async fn js_file_created(&self, store: &RecordStore, record: &JsFile);
    async fn js_file_updated(&self, store: &RecordStore, record: &JsFile);
}

/// SQLite-backed store for `tmp_endpoints`, `endpoints`, `js_files` and
/// `findings`.
pub struct RecordStore {
    db_path: PathBuf,
    hooks: OnceLock<Arc<dyn RecordHooks>>,
}

impl RecordStore {
    /// Open (or create) the store at the given database file and ensure the
    /// schema exists.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            hooks: OnceLock::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Install the hook set. May be called at most once; later calls are
    /// ignored so tests can share bootstrap helpers.
    pub fn install_hooks(&self, hooks: Arc<dyn RecordHooks>) {
        let _ = self.hooks.set(hooks);
    }

    pub(crate) fn hooks(&self) -> Option<Arc<dyn RecordHooks>> {
        self.hooks.get().cloned()
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- Ingest staging records; deleted once promoted to endpoints
            CREATE TABLE IF NOT EXISTS tmp_endpoints (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                query_string TEXT NOT NULL DEFAULT '',
                request_headers TEXT NOT NULL DEFAULT 'null',
                tmp_body TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS endpoints (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                query_string TEXT NOT NULL DEFAULT '',
                request_headers TEXT NOT NULL DEFAULT 'null',
                hash TEXT NOT NULL DEFAULT '',
                mobile_hash TEXT NOT NULL DEFAULT '',
                extraction_status TEXT NOT NULL DEFAULT 'pending',
                prettify_status TEXT NOT NULL DEFAULT 'pending',
                js_files TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS js_files (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                hash TEXT NOT NULL DEFAULT '',
                parent_id TEXT,
                has_chunks INTEGER NOT NULL DEFAULT 0,
                line_count INTEGER NOT NULL DEFAULT 0,
                type TEXT NOT NULL,
                prettify_status TEXT NOT NULL DEFAULT 'pending',
                sourcemap_status TEXT NOT NULL DEFAULT 'pending',
                analysis_status TEXT NOT NULL DEFAULT 'pending',
                dechunker_status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS findings (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                line INTEGER NOT NULL,
                "column" INTEGER NOT NULL,
                value TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                js_file TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_endpoints_hash ON endpoints(hash);
            CREATE INDEX IF NOT EXISTS idx_endpoints_extraction
                ON endpoints(extraction_status, created_at);
            CREATE INDEX IF NOT EXISTS idx_endpoints_prettify
                ON endpoints(prettify_status, created_at);
            CREATE INDEX IF NOT EXISTS idx_js_files_url ON js_files(url);
            CREATE INDEX IF NOT EXISTS idx_js_files_hash ON js_files(hash);
            CREATE INDEX IF NOT EXISTS idx_findings_js_file ON findings(js_file);
        "#,
        )?;
        Ok(())
    }
}
