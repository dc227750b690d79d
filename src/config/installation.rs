//! Helper binary installation.
//!
//! The prettifier, analyzer and dechunker are prebuilt native helpers
//! published as GitHub release assets. Each release carries a
//! `checksums.txt` manifest; a local binary is replaced whenever its SHA-256
//! no longer matches the manifest entry for this platform.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::{binary_file_name, libs_directory};
use crate::utils::hash;

const ANALYZER_REPO_URL: &str =
    "https://github.com/rollinx1/jshunter-analyzer/releases/latest/download";
const PRETTIFIER_REPO_URL: &str =
    "https://github.com/rollinx1/jshunter-prettifier/releases/latest/download";
const DECHUNKER_REPO_URL: &str =
    "https://github.com/rollinx1/jshunter-dechunker/releases/latest/download";

const HELPERS: [(&str, &str); 3] = [
    ("analyzer", ANALYZER_REPO_URL),
    ("prettifier", PRETTIFIER_REPO_URL),
    ("dechunker", DECHUNKER_REPO_URL),
];

/// Check helper binaries against their release checksums and download any
/// that are missing or stale. With `force`, the install directory is wiped
/// first.
pub async fn run_installation_steps(force: bool) -> Result<()> {
    info!("Checking for dependencies...");

    let libs_dir = libs_directory();
    if force {
        info!("--force flag detected, removing existing dependencies");
        if libs_dir.exists() {
            std::fs::remove_dir_all(&libs_dir).context("removing libs directory")?;
        }
    }
    std::fs::create_dir_all(&libs_dir).context("creating libs directory")?;

    let mut stale = Vec::new();
    for (name, repo_url) in HELPERS {
        if needs_update(name, repo_url).await? {
            stale.push((name, repo_url));
        }
    }

    if stale.is_empty() {
        info!("All dependencies are up to date.");
        return Ok(());
    }

    for (name, repo_url) in stale {
        download_and_verify(name, repo_url).await?;
    }
    Ok(())
}

/// Whether all three helper binaries are present on disk.
pub fn helpers_installed() -> bool {
    let libs_dir = libs_directory();
    HELPERS
        .iter()
        .all(|(name, _)| libs_dir.join(binary_file_name(name)).exists())
}

async fn needs_update(name: &str, repo_url: &str) -> Result<bool> {
    let checksums = download_checksums(repo_url)
        .await
        .with_context(|| format!("downloading checksums for {name}"))?;
    let expected = expected_checksum(&checksums, name)?;

    let local_path = local_binary_path(name);
    if !local_path.exists() {
        info!("Dependency {} not found.", name);
        return Ok(true);
    }

    let current = hash::file_sha256_hex(&local_path)
        .with_context(|| format!("hashing local binary {name}"))?;
    if current != expected {
        info!("New version of {} available.", name);
        return Ok(true);
    }
    Ok(false)
}

async fn download_and_verify(name: &str, repo_url: &str) -> Result<()> {
    let checksums = download_checksums(repo_url).await?;
    let expected = expected_checksum(&checksums, name)?;

    download_binary(name, repo_url).await?;

    let local_path = local_binary_path(name);
    let actual = hash::file_sha256_hex(&local_path)?;
    if actual != expected {
        bail!("checksum mismatch for downloaded binary {name}: expected {expected}, got {actual}");
    }
    Ok(())
}

async fn download_checksums(repo_url: &str) -> Result<HashMap<String, String>> {
    let checksum_url = format!("{repo_url}/checksums.txt");
    let response = reqwest::get(&checksum_url).await?;
    if !response.status().is_success() {
        bail!(
            "failed to download checksums.txt: HTTP status {}",
            response.status()
        );
    }

    let body = response.text().await?;
    let mut checksums = HashMap::new();
    for line in body.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(digest), Some(file)) = (parts.next(), parts.next()) {
            let file_name = file.rsplit('/').next().unwrap_or(file);
            checksums.insert(file_name.to_string(), digest.to_string());
        }
    }
    Ok(checksums)
}

fn expected_checksum(checksums: &HashMap<String, String>, name: &str) -> Result<String> {
    let platform_name = platform_specific_name(name);
    checksums
        .get(&platform_name)
        .cloned()
        .with_context(|| format!("checksum not found for {platform_name}"))
}

async fn download_binary(name: &str, repo_url: &str) -> Result<()> {
    let platform_name = platform_specific_name(name);
    let download_url = format!("{repo_url}/{platform_name}");
    let dst_path = local_binary_path(name);

    info!("Downloading {} from {}", name, download_url);
    let response = reqwest::get(&download_url).await?;
    if !response.status().is_success() {
        bail!(
            "failed to download {name} from {download_url}: HTTP status {}",
            response.status()
        );
    }

    let bytes = response.bytes().await?;
    std::fs::write(&dst_path, &bytes)
        .with_context(|| format!("writing {}", dst_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dst_path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("making {name} executable"))?;
    }

    Ok(())
}

fn local_binary_path(name: &str) -> PathBuf {
    libs_directory().join(binary_file_name(name))
}

/// Release asset name for this platform, e.g. `analyzer-linux-x64`.
fn platform_specific_name(name: &str) -> String {
    let os = std::env::consts::OS;
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        other => other,
    };
    let ext = if cfg!(windows) { ".exe" } else { "" };
    format!("{name}-{os}-{arch}{ext}")
}
