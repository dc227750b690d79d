//! URL resolution and filename extraction.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use url::Url;

/// Strip the query string and fragment from a URL.
pub fn remove_query_string(raw: &str) -> Result<String> {
    let mut parsed = Url::parse(raw)?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Resolve `input` against `base`, returning `input` unchanged when it is
/// already absolute.
pub fn to_absolute_url(base: &str, input: &str) -> Result<String> {
    if let Ok(parsed) = Url::parse(input) {
        return Ok(parsed.to_string());
    }
    let base = Url::parse(base)?;
    Ok(base.join(input)?.to_string())
}

/// Resolve a `<script src>` value against the page URL. Handles absolute,
/// protocol-relative, root-relative and relative forms; on parse failure the
/// raw value is returned so the caller can still attempt a fetch.
pub fn normalize_url(script_url: &str, base_url: &str) -> String {
    if script_url.starts_with("http://") || script_url.starts_with("https://") {
        return script_url.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(script_url)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => script_url.to_string(),
    }
}

/// Decode a `data:` URI payload, honouring an optional `;base64` marker.
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>> {
    let (header, content) = data_uri
        .split_once(',')
        .ok_or_else(|| anyhow!("invalid data URI format"))?;

    if header.contains(";base64") {
        Ok(BASE64.decode(content)?)
    } else {
        Ok(content.as_bytes().to_vec())
    }
}

/// Extract the hostname from a URL.
pub fn domain_from_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw)?;
    parsed
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| anyhow!("no domain found in URL '{}'", raw))
}

/// Extract the last path segment of a URL for use as a filename.
///
/// Empty segments become `index.html`; overlong names are truncated to 100
/// characters to stay filesystem-safe.
pub fn file_name_from_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw)?;
    let mut name = parsed
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        name = "index.html".to_string();
    }
    if name.len() > 100 {
        name.truncate(100);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_query_string_strips_query_and_fragment() {
        assert_eq!(
            remove_query_string("https://a.test/app.js?v=3#frag").unwrap(),
            "https://a.test/app.js"
        );
    }

    #[test]
    fn to_absolute_url_passes_through_absolute() {
        assert_eq!(
            to_absolute_url("https://a.test/x.js", "https://cdn.test/map.js.map").unwrap(),
            "https://cdn.test/map.js.map"
        );
    }

    #[test]
    fn to_absolute_url_resolves_relative() {
        assert_eq!(
            to_absolute_url("https://a.test/static/x.js", "x.js.map").unwrap(),
            "https://a.test/static/x.js.map"
        );
    }

    #[test]
    fn normalize_url_protocol_relative() {
        assert_eq!(
            normalize_url("//cdn.test/app.js", "https://a.test/"),
            "https://cdn.test/app.js"
        );
        assert_eq!(
            normalize_url("//cdn.test/app.js", "http://a.test/"),
            "http://cdn.test/app.js"
        );
    }

    #[test]
    fn normalize_url_root_relative() {
        assert_eq!(
            normalize_url("/js/app.js", "https://a.test/deep/page"),
            "https://a.test/js/app.js"
        );
    }

    #[test]
    fn normalize_url_relative() {
        assert_eq!(
            normalize_url("chunk.js", "https://a.test/assets/"),
            "https://a.test/assets/chunk.js"
        );
    }

    #[test]
    fn decode_data_uri_base64() {
        let uri = "data:application/json;base64,eyJ2ZXJzaW9uIjozfQ==";
        assert_eq!(decode_data_uri(uri).unwrap(), b"{\"version\":3}");
    }

    #[test]
    fn decode_data_uri_plain() {
        let uri = "data:application/json,{\"version\":3}";
        assert_eq!(decode_data_uri(uri).unwrap(), b"{\"version\":3}");
    }

    #[test]
    fn decode_data_uri_rejects_malformed() {
        assert!(decode_data_uri("data:application/json").is_err());
    }

    #[test]
    fn file_name_from_url_extracts_last_segment() {
        assert_eq!(
            file_name_from_url("https://a.test/static/app.min.js?v=1").unwrap(),
            "app.min.js"
        );
    }

    #[test]
    fn file_name_from_url_defaults_to_index() {
        assert_eq!(file_name_from_url("https://a.test/").unwrap(), "index.html");
        assert_eq!(file_name_from_url("https://a.test").unwrap(), "index.html");
    }

    #[test]
    fn file_name_from_url_truncates_long_names() {
        let raw = format!("https://a.test/{}.js", "a".repeat(200));
        assert_eq!(file_name_from_url(&raw).unwrap().len(), 100);
    }
}
