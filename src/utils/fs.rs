//! Filesystem path sanitization and directory helpers.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static regex"))
}

fn multiple_dots() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.{2,}").expect("static regex"))
}

/// Extract and sanitize the domain of a URL for use as a directory name.
pub fn extract_domain(raw_url: &str) -> anyhow::Result<String> {
    let domain = super::url::domain_from_url(raw_url)?;
    Ok(clean_path(&domain))
}

/// Clean a single path value for safe filesystem use.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "unknown".to_string();
    }

    let mut path = path
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_start_matches("ftp://")
        .to_string();

    path = invalid_chars().replace_all(&path, "_").into_owned();
    path = multiple_dots().replace_all(&path, ".").into_owned();
    path = path.trim_matches(|c| c == '.' || c == ' ').to_string();
    path = path.replace(' ', "_");

    if path.is_empty() || path == "." || path == ".." {
        return "unknown".to_string();
    }
    if path.len() > 100 {
        path.truncate(100);
    }
    path
}

/// Clean a single component of a source path.
pub fn clean_path_component(component: &str) -> String {
    if component.is_empty() {
        return String::new();
    }

    let mut component = invalid_chars().replace_all(component, "_").into_owned();
    component = multiple_dots().replace_all(&component, ".").into_owned();
    component = component.trim_matches(|c| c == '.' || c == ' ').to_string();
    component = component.replace(' ', "_");

    if component.len() > 50 {
        component.truncate(50);
    }
    component
}

/// Clean a sourcemap source path for storage, preserving directory structure
/// while dropping anything that could escape the target directory.
pub fn clean_source_path(path: &str) -> PathBuf {
    if path.is_empty() {
        return PathBuf::from("unknown.js");
    }

    let components: Vec<String> = path
        .split('/')
        .map(clean_path_component)
        .filter(|c| !c.is_empty() && c != "." && c != "..")
        .collect();

    if components.is_empty() {
        return PathBuf::from("unknown.js");
    }

    components.iter().collect()
}

/// Recursively count files and sum their sizes under a directory.
pub fn dir_stats(dir: &Path) -> (u64, u64) {
    let mut files = 0u64;
    let mut bytes = 0u64;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return (0, 0),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let (f, b) = dir_stats(&path);
            files += f;
            bytes += b;
        } else if let Ok(meta) = entry.metadata() {
            files += 1;
            bytes += meta.len();
        }
    }
    (files, bytes)
}

/// Move a directory, falling back to copy-and-remove across filesystems.
pub fn move_directory(source: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    copy_directory(source, dest)?;
    std::fs::remove_dir_all(source)
}

fn copy_directory(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_directory(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Move a target's `db/` and `files/` subdirectories to a new storage root.
pub fn move_target_files(source_dir: &Path, dest_dir: &Path) -> std::io::Result<()> {
    if !source_dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dest_dir)?;

    for sub in ["db", "files"] {
        let source = source_dir.join(sub);
        if source.exists() {
            move_directory(&source, &dest_dir.join(sub))?;
        }
    }

    // Drop the old root when nothing is left in it.
    if std::fs::read_dir(source_dir)?.next().is_none() {
        let _ = std::fs::remove_dir(source_dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_sanitizes_invalid_chars() {
        assert_eq!(clean_path("a:b|c?d"), "a_b_c_d");
        assert_eq!(clean_path("cdn.example.com"), "cdn.example.com");
    }

    #[test]
    fn clean_path_handles_empty_and_reserved() {
        assert_eq!(clean_path(""), "unknown");
        assert_eq!(clean_path(".."), "unknown");
        assert_eq!(clean_path(". "), "unknown");
    }

    #[test]
    fn clean_path_collapses_dot_runs() {
        assert_eq!(clean_path("a...b"), "a.b");
    }

    #[test]
    fn clean_source_path_blocks_traversal() {
        let cleaned = clean_source_path("../../../etc/passwd");
        assert_eq!(cleaned, PathBuf::from("etc/passwd"));
        assert!(!cleaned.to_string_lossy().contains(".."));
    }

    #[test]
    fn clean_source_path_preserves_structure() {
        assert_eq!(
            clean_source_path("webpack://src/components/App.vue"),
            PathBuf::from("webpack_/src/components/App.vue")
        );
    }

    #[test]
    fn clean_source_path_empty_fallback() {
        assert_eq!(clean_source_path(""), PathBuf::from("unknown.js"));
        assert_eq!(clean_source_path("../.."), PathBuf::from("unknown.js"));
    }

    #[test]
    fn dir_stats_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/x.js"), b"1234").unwrap();
        std::fs::write(dir.path().join("a/b/y.js"), b"56").unwrap();
        assert_eq!(dir_stats(dir.path()), (2, 6));
    }

    #[test]
    fn move_target_files_relocates_db_and_files() {
        let root = tempfile::tempdir().unwrap();
        let old = root.path().join("old");
        let new = root.path().join("new");
        std::fs::create_dir_all(old.join("db")).unwrap();
        std::fs::create_dir_all(old.join("files")).unwrap();
        std::fs::write(old.join("db/data.db"), b"db").unwrap();

        move_target_files(&old, &new).unwrap();

        assert!(new.join("db/data.db").exists());
        assert!(!old.exists());
    }
}
