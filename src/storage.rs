//! Content-addressed storage for harvested HTML and JS files.
//!
//! Layout under the target's `files/` root:
//!
//! ```text
//! <domain>/<hash>/<filename>              HTML or JS file
//! <domain>/<js_hash>/original/<path>      sources recovered from a sourcemap
//! ```
//!
//! `<domain>` is the URL hostname sanitized for the filesystem and
//! `<filename>` the URL's last path segment. Writers skip paths that already
//! exist, which makes concurrent and repeated writes race-free.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::utils::{fs as fsutil, hash, html_hash, url as urlutil};

/// Resolve the storage path of a JS file from its URL and content hash.
pub fn js_file_path(files_root: &Path, url: &str, content_hash: &str) -> Result<PathBuf> {
    let domain = fsutil::extract_domain(url)?;
    let filename = urlutil::file_name_from_url(url)?;
    Ok(files_root.join(domain).join(content_hash).join(filename))
}

/// Resolve the storage path of an endpoint's HTML from its URL and
/// structural hash.
pub fn html_file_path(files_root: &Path, url: &str, structural_hash: &str) -> Result<PathBuf> {
    // Same addressing scheme; only the hash function differs.
    js_file_path(files_root, url, structural_hash)
}

/// Save JS content under its content-hash directory. Returns the content
/// hash. Existing files are left untouched.
pub fn save_js_file(files_root: &Path, url: &str, content: &str) -> Result<String> {
    let content_hash = hash::sha256_hex(content.as_bytes());
    let full_path = js_file_path(files_root, url, &content_hash)?;
    write_if_absent(&full_path, content.as_bytes())?;
    Ok(content_hash)
}

/// Save rendered HTML under its structural-hash directory. Returns the
/// structural hash. Existing files are left untouched.
pub fn save_html_file(files_root: &Path, url: &str, content: &str) -> Result<String> {
    let structural_hash = html_hash::structural_hash(content);
    let full_path = html_file_path(files_root, url, &structural_hash)?;
    write_if_absent(&full_path, content.as_bytes())?;
    Ok(structural_hash)
}

/// Save one sourcemap-recovered source file under
/// `<domain>/<js_hash>/original/<sanitized path>`. Returns the written path,
/// or `None` when the file already existed.
pub fn save_sourcemap_source(
    files_root: &Path,
    domain: &str,
    js_hash: &str,
    source_path: &str,
    content: &str,
) -> Result<Option<PathBuf>> {
    let cleaned = fsutil::clean_source_path(source_path);

    let mut filename = cleaned
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if filename.is_empty() || filename == "." {
        filename = "unknown.js".to_string();
    }
    if Path::new(&filename).extension().is_none() {
        filename.push_str(".js");
    }

    let mut dir = files_root.join(domain).join(js_hash).join("original");
    if let Some(parent) = cleaned.parent() {
        dir = dir.join(parent);
    }
    let full_path = dir.join(filename);

    if full_path.exists() {
        return Ok(None);
    }
    write_if_absent(&full_path, content.as_bytes())?;
    Ok(Some(full_path))
}

fn write_if_absent(path: &Path, content: &[u8]) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn js_path_uses_domain_hash_and_filename() {
        let path = js_file_path(Path::new("/files"), "https://cdn.test/static/app.js", "abc123")
            .unwrap();
        assert_eq!(path, PathBuf::from("/files/cdn.test/abc123/app.js"));
    }

    #[test]
    fn js_path_defaults_filename_for_bare_domain() {
        let path = js_file_path(Path::new("/files"), "https://cdn.test/", "abc").unwrap();
        assert_eq!(path, PathBuf::from("/files/cdn.test/abc/index.html"));
    }

    #[test]
    fn save_js_file_writes_once() {
        let dir = tempdir().unwrap();
        let hash1 = save_js_file(dir.path(), "https://a.test/x.js", "var a = 1;").unwrap();
        let path = js_file_path(dir.path(), "https://a.test/x.js", &hash1).unwrap();
        assert!(path.exists());

        // Second write with the same content is a no-op, not an error.
        let hash2 = save_js_file(dir.path(), "https://a.test/x.js", "var a = 1;").unwrap();
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn save_html_file_addresses_by_structural_hash() {
        let dir = tempdir().unwrap();
        let html = "<html><body><p>x</p></body></html>";
        let hash = save_html_file(dir.path(), "https://a.test/", html).unwrap();
        assert_eq!(hash, crate::utils::html_hash::structural_hash(html));
        assert!(dir.path().join("a.test").join(&hash).join("index.html").exists());
    }

    #[test]
    fn sourcemap_source_lands_under_original() {
        let dir = tempdir().unwrap();
        let written =
            save_sourcemap_source(dir.path(), "a.test", "h1", "src/lib/util.ts", "let x = 1")
                .unwrap()
                .unwrap();
        assert_eq!(
            written,
            dir.path().join("a.test/h1/original/src/lib/util.ts")
        );
        // Repeat write short-circuits.
        assert!(save_sourcemap_source(dir.path(), "a.test", "h1", "src/lib/util.ts", "x")
            .unwrap()
            .is_none());
    }

    #[test]
    fn sourcemap_traversal_cannot_escape_original() {
        let dir = tempdir().unwrap();
        let written =
            save_sourcemap_source(dir.path(), "a.test", "h1", "../../../etc/passwd", "x")
                .unwrap()
                .unwrap();
        assert!(written.starts_with(dir.path().join("a.test/h1/original")));
        assert!(!written.to_string_lossy().contains(".."));
    }

    #[test]
    fn sourcemap_source_without_extension_gets_js() {
        let dir = tempdir().unwrap();
        let written = save_sourcemap_source(dir.path(), "a.test", "h1", "src/Makefile2", "x")
            .unwrap()
            .unwrap();
        assert!(written.ends_with("original/src/Makefile2.js"));
    }
}
