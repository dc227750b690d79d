//! End-to-end pipeline tests with a scripted extractor and stub helper
//! binaries. The browser is the only component substituted; everything else
//! (store, hooks, pools, storage tree) is the real thing on a temp dir.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jshunter::config::Settings;
use jshunter::hooks::PipelineHooks;
use jshunter::models::{JsFileType, NewEndpoint, NewJsFile, StageStatus};
use jshunter::recovery;
use jshunter::repository::RecordStore;
use jshunter::storage;
use jshunter::workers::extraction::{
    ExtractionOptions, JsExtractor, JsResource, PageCapture, ResourceSource,
};
use jshunter::workers::PoolRegistry;

/// Extractor returning a canned page regardless of URL.
struct ScriptedExtractor {
    html: String,
    resources: Vec<JsResource>,
}

#[async_trait]
impl JsExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _url: &str,
        _options: &ExtractionOptions,
    ) -> anyhow::Result<PageCapture> {
        Ok(PageCapture {
            html: self.html.clone(),
            resources: self.resources.clone(),
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    settings: Arc<Settings>,
    store: Arc<RecordStore>,
    pools: Arc<PoolRegistry>,
}

fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const NOOP_PRETTIFIER: &str = "#!/bin/sh\nexit 0\n";

const ANALYZER_ONE_URL: &str = concat!(
    "#!/bin/sh\n",
    "echo '{\"urls\":[{\"value\":\"https://api.example.com/v1\",\"line\":0,",
    "\"column\":3,\"type\":\"literal\",\"metadata\":{\"source\":\"fetch\"}}],",
    "\"gql\":[],\"domxss\":[],\"events\":[],\"httpapi\":[]}'\n",
);

const DECHUNKER_EMPTY: &str = "#!/bin/sh\nexit 0\n";

/// Build a full pipeline (store + pools + hooks) on a temp dir with the
/// given extractor and helper stubs.
async fn bootstrap(extractor: Arc<dyn JsExtractor>, dechunker_script: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let libs = dir.path().join("libs");
    std::fs::create_dir_all(&libs).unwrap();

    let prettifier = write_stub(&libs, "prettifier", NOOP_PRETTIFIER);
    let analyzer = write_stub(&libs, "analyzer", ANALYZER_ONE_URL);
    let dechunker = write_stub(&libs, "dechunker", dechunker_script);

    let storage_dir = dir.path().join("storage");
    std::fs::create_dir_all(storage_dir.join("db")).unwrap();
    std::fs::create_dir_all(storage_dir.join("files")).unwrap();

    let mut settings = Settings::for_target("test", storage_dir);
    settings.prettifier_binary = prettifier;
    settings.analyzer_binary = analyzer;
    settings.dechunker_binary = dechunker;
    settings.workers.extraction_workers = 2;
    settings.workers.prettify_workers = 2;
    settings.workers.sourcemap_workers = 2;
    settings.workers.analysis_workers = 2;
    settings.workers.dechunker_workers = 2;
    let settings = Arc::new(settings);

    let store = Arc::new(RecordStore::open(&settings.database_file()).unwrap());
    let pools = Arc::new(PoolRegistry::new(
        store.clone(),
        settings.clone(),
        extractor,
    ));
    pools.start_all().await.unwrap();
    store.install_hooks(Arc::new(PipelineHooks::new(
        settings.clone(),
        pools.clone(),
    )));

    Harness {
        _dir: dir,
        settings,
        store,
        pools,
    }
}

/// Poll until `condition` returns true or the deadline passes.
async fn wait_for<F>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn minimal_endpoint_yields_inline_js_file() {
    let extractor = Arc::new(ScriptedExtractor {
        html: "<html><body><script>alert(1)</script></body></html>".to_string(),
        resources: Vec::new(),
    });
    let harness = bootstrap(extractor, DECHUNKER_EMPTY).await;

    let endpoint = harness
        .store
        .create_endpoint(NewEndpoint {
            url: "http://example.test/".to_string(),
            query_string: String::new(),
            request_headers: serde_json::Value::Null,
            hash: String::new(),
        })
        .await
        .unwrap();

    let store = harness.store.clone();
    let id = endpoint.id.clone();
    wait_for("endpoint extraction to finish", WAIT, || {
        store
            .find_endpoint(&id)
            .unwrap()
            .map(|e| e.extraction_status == StageStatus::Processed)
            .unwrap_or(false)
    })
    .await;

    let endpoint = harness.store.find_endpoint(&endpoint.id).unwrap().unwrap();
    assert_eq!(endpoint.js_files.len(), 1);
    assert!(!endpoint.hash.is_empty());

    let js_file = harness
        .store
        .find_js_file_by_url("http://example.test/inline_1.js")
        .unwrap()
        .expect("inline js_file registered");
    assert_eq!(js_file.file_type, JsFileType::Inline);
    assert_eq!(endpoint.js_files[0], js_file.id);
    // Inline files never enter the dechunker.
    assert_eq!(js_file.dechunker_status, StageStatus::Processed);

    let body_path = storage::js_file_path(
        &harness.settings.files_path(),
        &js_file.url,
        &js_file.hash,
    )
    .unwrap();
    assert_eq!(std::fs::read_to_string(body_path).unwrap(), "alert(1)");

    // HTML and JS prettify both complete against the no-op prettifier.
    let store = harness.store.clone();
    let endpoint_id = endpoint.id.clone();
    let js_id = js_file.id.clone();
    wait_for("prettify to finish", WAIT, || {
        let ep = store.find_endpoint(&endpoint_id).unwrap().unwrap();
        let js = store.find_js_file(&js_id).unwrap().unwrap();
        ep.prettify_status == StageStatus::Processed
            && js.prettify_status == StageStatus::Processed
    })
    .await;

    harness.pools.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_js_registration_is_suppressed() {
    let extractor = Arc::new(ScriptedExtractor {
        html: "<html><body></body></html>".to_string(),
        resources: vec![JsResource {
            url: "https://cdn.test/app.js".to_string(),
            content: "var app = 1;".to_string(),
            source: ResourceSource::Network,
        }],
    });
    let harness = bootstrap(extractor, DECHUNKER_EMPTY).await;

    // Two extraction passes over endpoints that load the same script.
    let mut endpoint_ids = Vec::new();
    for url in ["https://a.test/", "https://b.test/page"] {
        let endpoint = harness
            .store
            .create_endpoint(NewEndpoint {
                url: url.to_string(),
                query_string: String::new(),
                request_headers: serde_json::Value::Null,
                hash: String::new(),
            })
            .await
            .unwrap();
        endpoint_ids.push(endpoint.id);
    }

    let store = harness.store.clone();
    let ids = endpoint_ids.clone();
    wait_for("both extractions to finish", WAIT, || {
        ids.iter().all(|id| {
            store
                .find_endpoint(id)
                .unwrap()
                .map(|e| e.extraction_status == StageStatus::Processed)
                .unwrap_or(false)
        })
    })
    .await;

    assert_eq!(harness.store.count_js_files().unwrap(), 1);
    let first = harness.store.find_endpoint(&endpoint_ids[0]).unwrap().unwrap();
    let second = harness.store.find_endpoint(&endpoint_ids[1]).unwrap().unwrap();
    assert_eq!(first.js_files, second.js_files);
    assert_eq!(first.js_files.len(), 1);

    // The writer itself also suppresses duplicates by hash under a new URL.
    let existing = harness
        .store
        .find_js_file(&first.js_files[0])
        .unwrap()
        .unwrap();
    let reregistered = harness
        .store
        .create_js_file(NewJsFile {
            url: "https://cdn.test/renamed.js".to_string(),
            hash: existing.hash.clone(),
            parent_id: None,
            has_chunks: false,
            file_type: JsFileType::Normal,
        })
        .await
        .unwrap();
    assert_eq!(reregistered.id, existing.id);
    assert_eq!(harness.store.count_js_files().unwrap(), 1);

    harness.pools.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_sourcemap_is_processed_without_sources() {
    let extractor = Arc::new(ScriptedExtractor {
        html: String::new(),
        resources: Vec::new(),
    });
    let harness = bootstrap(extractor, DECHUNKER_EMPTY).await;

    let files_root = harness.settings.files_path();
    let url = "http://sourcemapless.invalid/plain.js";
    let hash = storage::save_js_file(&files_root, url, "var plain = true;").unwrap();

    let js_file = harness
        .store
        .create_js_file(NewJsFile {
            url: url.to_string(),
            hash,
            parent_id: None,
            has_chunks: false,
            file_type: JsFileType::Normal,
        })
        .await
        .unwrap();

    let store = harness.store.clone();
    let id = js_file.id.clone();
    wait_for("sourcemap stage to finish", WAIT, || {
        store
            .find_js_file(&id)
            .unwrap()
            .map(|f| f.sourcemap_status == StageStatus::Processed)
            .unwrap_or(false)
    })
    .await;

    let original_dir = files_root
        .join("sourcemapless.invalid")
        .join(&js_file.hash)
        .join("original");
    assert!(!original_dir.exists());

    harness.pools.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sourcemap_traversal_stays_under_original() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let extractor = Arc::new(ScriptedExtractor {
        html: String::new(),
        resources: Vec::new(),
    });
    let harness = bootstrap(extractor, DECHUNKER_EMPTY).await;

    let sourcemap =
        br#"{"version":3,"sources":["../../../etc/passwd"],"sourcesContent":["x"]}"#;
    let body = format!(
        "var a = 1;\n//# sourceMappingURL=data:application/json;base64,{}",
        BASE64.encode(sourcemap)
    );

    let files_root = harness.settings.files_path();
    let url = "http://mapped.invalid/app.js";
    let hash = storage::save_js_file(&files_root, url, &body).unwrap();

    let js_file = harness
        .store
        .create_js_file(NewJsFile {
            url: url.to_string(),
            hash: hash.clone(),
            parent_id: None,
            has_chunks: false,
            file_type: JsFileType::Normal,
        })
        .await
        .unwrap();

    let store = harness.store.clone();
    let id = js_file.id.clone();
    wait_for("sourcemap extraction to finish", WAIT, || {
        store
            .find_js_file(&id)
            .unwrap()
            .map(|f| f.sourcemap_status == StageStatus::Processed)
            .unwrap_or(false)
    })
    .await;

    let original_dir = files_root
        .join("mapped.invalid")
        .join(&hash)
        .join("original");
    assert!(original_dir.exists());

    // Every recovered file must live under original/, traversal included.
    let escaped = files_root.join("etc");
    assert!(!escaped.exists());
    assert!(original_dir.join("etc").exists());

    harness.pools.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunk_discovery_recurses_without_redechunking() {
    use axum::http::header;
    use axum::routing::get;

    // Local server the chunk is fetched from.
    let app = axum::Router::new().route(
        "/b.js",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "application/javascript")],
                "console.log(2)",
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let chunk_base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let extractor = Arc::new(ScriptedExtractor {
        html: String::new(),
        resources: Vec::new(),
    });
    let dechunker_script = format!("#!/bin/sh\necho '{chunk_base}/b.js'\n");
    let harness = bootstrap(extractor, &dechunker_script).await;

    let files_root = harness.settings.files_path();
    let parent_url = "http://bundle.invalid/main.js";
    let parent_hash =
        storage::save_js_file(&files_root, parent_url, "import('./b.js');").unwrap();

    let parent = harness
        .store
        .create_js_file(NewJsFile {
            url: parent_url.to_string(),
            hash: parent_hash,
            parent_id: None,
            has_chunks: false,
            file_type: JsFileType::Normal,
        })
        .await
        .unwrap();

    let store = harness.store.clone();
    let chunk_url = format!("{chunk_base}/b.js");
    let lookup_url = chunk_url.clone();
    wait_for("chunk js_file to be registered", WAIT, || {
        store
            .find_js_file_by_url(&lookup_url)
            .unwrap()
            .map(|f| f.analysis_status == StageStatus::Processed)
            .unwrap_or(false)
    })
    .await;

    let chunk = harness
        .store
        .find_js_file_by_url(&chunk_url)
        .unwrap()
        .unwrap();
    assert_eq!(chunk.file_type, JsFileType::Chunk);
    assert_eq!(chunk.parent_id.as_deref(), Some(parent.id.as_str()));
    assert!(!chunk.has_chunks);
    // Chunks skip dechunking by construction.
    assert_eq!(chunk.dechunker_status, StageStatus::Processed);
    assert_eq!(chunk.prettify_status, StageStatus::Processed);

    let store = harness.store.clone();
    let parent_id = parent.id.clone();
    wait_for("parent dechunking to finish", WAIT, || {
        store
            .find_js_file(&parent_id)
            .unwrap()
            .map(|f| f.dechunker_status == StageStatus::Processed && f.has_chunks)
            .unwrap_or(false)
    })
    .await;

    harness.pools.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovery_resubmits_interrupted_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let libs = dir.path().join("libs");
    std::fs::create_dir_all(&libs).unwrap();
    let prettifier = write_stub(&libs, "prettifier", NOOP_PRETTIFIER);
    let analyzer = write_stub(&libs, "analyzer", ANALYZER_ONE_URL);
    let dechunker = write_stub(&libs, "dechunker", DECHUNKER_EMPTY);

    let storage_dir = dir.path().join("storage");
    std::fs::create_dir_all(storage_dir.join("db")).unwrap();
    std::fs::create_dir_all(storage_dir.join("files")).unwrap();

    let mut settings = Settings::for_target("test", storage_dir);
    settings.prettifier_binary = prettifier;
    settings.analyzer_binary = analyzer;
    settings.dechunker_binary = dechunker;
    let settings = Arc::new(settings);

    let url = "http://crashed.invalid/app.js";
    let hash =
        storage::save_js_file(&settings.files_path(), url, "var crashed = 1;").unwrap();

    // First process: no hooks installed, simulating a record caught
    // mid-pipeline when the process died.
    let js_id = {
        let store = RecordStore::open(&settings.database_file()).unwrap();
        let mut js_file = store
            .create_js_file(NewJsFile {
                url: url.to_string(),
                hash,
                parent_id: None,
                has_chunks: false,
                file_type: JsFileType::Normal,
            })
            .await
            .unwrap();
        js_file.prettify_status = StageStatus::Processed;
        js_file.sourcemap_status = StageStatus::Processed;
        js_file.dechunker_status = StageStatus::Processed;
        js_file.analysis_status = StageStatus::Processing;
        store.save_js_file(&js_file).await.unwrap();
        js_file.id
    };

    // Restart: fresh store on the same database, pools and hooks live.
    let store = Arc::new(RecordStore::open(&settings.database_file()).unwrap());
    let extractor = Arc::new(ScriptedExtractor {
        html: String::new(),
        resources: Vec::new(),
    });
    let pools = Arc::new(PoolRegistry::new(
        store.clone(),
        settings.clone(),
        extractor,
    ));
    pools.start_all().await.unwrap();
    store.install_hooks(Arc::new(PipelineHooks::new(
        settings.clone(),
        pools.clone(),
    )));

    let recovered = recovery::recover_pending_jobs(&store, &settings, &pools).await;
    assert_eq!(recovered, 1, "only the interrupted analysis is re-queued");

    let poll_store = store.clone();
    let poll_id = js_id.clone();
    wait_for("recovered analysis to finish", WAIT, || {
        poll_store
            .find_js_file(&poll_id)
            .unwrap()
            .map(|f| f.analysis_status == StageStatus::Processed)
            .unwrap_or(false)
    })
    .await;

    // Findings landed with clamped lines and the raw line preserved.
    let findings = store.findings_for_js_file(&js_id).unwrap();
    assert!(!findings.is_empty());
    for finding in &findings {
        assert!(finding.line >= 1);
        assert!(finding.metadata.get("original_line").is_some());
    }

    // A second sweep after completion finds nothing to do.
    let recovered_again = recovery::recover_pending_jobs(&store, &settings, &pools).await;
    assert_eq!(recovered_again, 0);

    pools.stop_all().await;
}
