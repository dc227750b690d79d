//! Sourcemap discovery, validation and parsing.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Deserialize;

use crate::utils::fetch::AssetFetcher;
use crate::utils::url as urlutil;

/// The subset of the sourcemap format this stage consumes.
#[derive(Debug, Deserialize)]
pub struct SourceMap {
    #[allow(dead_code)]
    pub version: i64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, rename = "sourcesContent")]
    pub sources_content: Vec<Option<String>>,
}

fn sourcemap_comment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//[@#]\s*sourceMappingURL=(.*)").expect("static regex"))
}

/// Find the sourcemap URL declared in a JS body. When the comment appears
/// more than once (concatenated bundles), the last one wins.
pub fn find_sourcemap_url(js_body: &str) -> Option<String> {
    sourcemap_comment_pattern()
        .captures_iter(js_body)
        .last()
        .map(|captures| captures[1].trim().to_string())
}

/// Resolve sourcemap bytes for a JS file.
///
/// Order: the declared URL (data URI or fetched), then the conventional
/// `<url-without-query>.map` fallback. Returns `None` when no valid
/// sourcemap can be obtained; that is an expected outcome, not an error.
pub async fn resolve_sourcemap(
    fetcher: &AssetFetcher,
    js_body: &str,
    js_url: &str,
) -> Option<Vec<u8>> {
    if let Some(declared) = find_sourcemap_url(js_body) {
        if let Ok(content) = sourcemap_from_url(fetcher, &declared, js_url).await {
            return Some(content);
        }
    }
    fallback_map_url(fetcher, js_url).await.ok()
}

async fn sourcemap_from_url(
    fetcher: &AssetFetcher,
    sourcemap_url: &str,
    js_url: &str,
) -> Result<Vec<u8>> {
    if sourcemap_url.starts_with("data:") {
        let content = urlutil::decode_data_uri(sourcemap_url)?;
        if !is_valid_sourcemap(&content) {
            return Err(anyhow!("data URI does not contain a valid sourcemap"));
        }
        return Ok(content);
    }

    let full_url = urlutil::to_absolute_url(js_url, sourcemap_url)?;
    fetch_sourcemap(fetcher, &full_url).await
}

async fn fallback_map_url(fetcher: &AssetFetcher, js_url: &str) -> Result<Vec<u8>> {
    let clean_url = urlutil::remove_query_string(js_url)?;
    fetch_sourcemap(fetcher, &format!("{clean_url}.map")).await
}

async fn fetch_sourcemap(fetcher: &AssetFetcher, map_url: &str) -> Result<Vec<u8>> {
    let asset = fetcher.rate_limited_get(map_url).await?;
    if !asset.is_success() {
        return Err(anyhow!("HTTP {} fetching sourcemap {}", asset.status, map_url));
    }
    if !is_valid_sourcemap(&asset.body) {
        return Err(anyhow!("downloaded content is not a valid sourcemap"));
    }
    Ok(asset.body)
}

/// A valid sourcemap is JSON with a numeric `version >= 1` and a `sources`
/// array.
pub fn is_valid_sourcemap(content: &[u8]) -> bool {
    let parsed: serde_json::Value = match serde_json::from_slice(content) {
        Ok(value) => value,
        Err(_) => return false,
    };

    let version_ok = parsed
        .get("version")
        .and_then(serde_json::Value::as_f64)
        .map(|v| v >= 1.0)
        .unwrap_or(false);
    let sources_ok = parsed.get("sources").map(|s| s.is_array()).unwrap_or(false);

    version_ok && sources_ok
}

/// Parse validated sourcemap bytes.
pub fn parse_sourcemap(content: &[u8]) -> Result<SourceMap> {
    Ok(serde_json::from_slice(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_hash_comment() {
        let body = "var x=1;\n//# sourceMappingURL=app.js.map\n";
        assert_eq!(find_sourcemap_url(body), Some("app.js.map".to_string()));
    }

    #[test]
    fn finds_at_comment() {
        let body = "var x=1;\n//@ sourceMappingURL=legacy.map";
        assert_eq!(find_sourcemap_url(body), Some("legacy.map".to_string()));
    }

    #[test]
    fn last_comment_wins() {
        let body = "//# sourceMappingURL=first.map\ncode();\n//# sourceMappingURL=second.map";
        assert_eq!(find_sourcemap_url(body), Some("second.map".to_string()));
    }

    #[test]
    fn no_comment_yields_none() {
        assert_eq!(find_sourcemap_url("var x = 1;"), None);
    }

    #[test]
    fn validation_requires_version_and_sources() {
        assert!(is_valid_sourcemap(br#"{"version":3,"sources":["a.js"]}"#));
        assert!(is_valid_sourcemap(br#"{"version":1,"sources":[]}"#));
        assert!(!is_valid_sourcemap(br#"{"sources":["a.js"]}"#));
        assert!(!is_valid_sourcemap(br#"{"version":0,"sources":[]}"#));
        assert!(!is_valid_sourcemap(br#"{"version":3}"#));
        assert!(!is_valid_sourcemap(br#"{"version":3,"sources":"x"}"#));
        assert!(!is_valid_sourcemap(b"not json"));
    }

    #[test]
    fn parse_tolerates_missing_sources_content() {
        let map = parse_sourcemap(br#"{"version":3,"sources":["a.js","b.js"]}"#).unwrap();
        assert_eq!(map.sources.len(), 2);
        assert!(map.sources_content.is_empty());
    }

    #[test]
    fn parse_tolerates_null_source_entries() {
        let map = parse_sourcemap(
            br#"{"version":3,"sources":["a.js","b.js"],"sourcesContent":["let a",null]}"#,
        )
        .unwrap();
        assert_eq!(map.sources_content[0].as_deref(), Some("let a"));
        assert!(map.sources_content[1].is_none());
    }

    #[tokio::test]
    async fn data_uri_sourcemap_is_decoded() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let payload = br#"{"version":3,"sources":["x.ts"],"sourcesContent":["let x"]}"#;
        let uri = format!("data:application/json;base64,{}", BASE64.encode(payload));
        let fetcher = AssetFetcher::new();
        let content = sourcemap_from_url(&fetcher, &uri, "https://a.test/x.js")
            .await
            .unwrap();
        assert_eq!(content, payload);
    }
}
