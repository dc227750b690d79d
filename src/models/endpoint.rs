//! Endpoint models: crawl targets and their ingest staging records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StageStatus;

/// Staging record created by the ingest API. The after-create hook
/// deduplicates it against existing endpoints by structural hash, promotes it
/// to an [`Endpoint`], and deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmpEndpoint {
    pub id: String,
    pub url: String,
    pub query_string: String,
    pub request_headers: Value,
    /// Raw HTML body used for structural-hash deduplication.
    pub tmp_body: String,
}

/// Fields for inserting a new staging record.
#[derive(Debug, Clone)]
pub struct NewTmpEndpoint {
    pub url: String,
    pub query_string: String,
    pub request_headers: Value,
    pub tmp_body: String,
}

/// A URL to crawl, plus the request headers used to fetch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    pub query_string: String,
    pub request_headers: Value,
    /// Structural hash of the rendered desktop HTML.
    pub hash: String,
    /// Structural hash of the rendered mobile HTML, when mobile extraction ran.
    pub mobile_hash: String,
    pub extraction_status: StageStatus,
    pub prettify_status: StageStatus,
    /// Ids of the js_files harvested from this endpoint.
    pub js_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a new endpoint; statuses start `pending`.
#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub url: String,
    pub query_string: String,
    pub request_headers: Value,
    pub hash: String,
}

impl Endpoint {
    /// Parse `request_headers` into a name→value map.
    pub fn header_map(&self) -> HashMap<String, String> {
        parse_request_headers(&self.request_headers)
    }
}

/// Parse the stored header JSON into a map. Three shapes are accepted:
/// an object `{name: value}`, an array of `{name, value}` objects, or an
/// array of bare names (mapped to empty values). Anything else yields an
/// empty map.
pub fn parse_request_headers(raw: &Value) -> HashMap<String, String> {
    match raw {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        Value::Array(items) => {
            let mut headers = HashMap::new();
            for item in items {
                match item {
                    Value::Object(obj) => {
                        let name = obj.get("name").and_then(Value::as_str);
                        let value = obj.get("value").and_then(Value::as_str).unwrap_or_default();
                        if let Some(name) = name {
                            headers.insert(name.to_string(), value.to_string());
                        }
                    }
                    Value::String(name) => {
                        headers.insert(name.clone(), String::new());
                    }
                    _ => {}
                }
            }
            headers
        }
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_from_object() {
        let headers = parse_request_headers(&json!({"Authorization": "Bearer t", "X-Id": "7"}));
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer t");
        assert_eq!(headers.get("X-Id").unwrap(), "7");
    }

    #[test]
    fn headers_from_name_value_array() {
        let headers =
            parse_request_headers(&json!([{"name": "Cookie", "value": "sid=1"}, {"name": "X"}]));
        assert_eq!(headers.get("Cookie").unwrap(), "sid=1");
        assert_eq!(headers.get("X").unwrap(), "");
    }

    #[test]
    fn headers_from_name_array() {
        let headers = parse_request_headers(&json!(["User-Agent", "Referer"]));
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("User-Agent").unwrap(), "");
    }

    #[test]
    fn headers_from_garbage_is_empty() {
        assert!(parse_request_headers(&json!(null)).is_empty());
        assert!(parse_request_headers(&json!("x")).is_empty());
        assert!(parse_request_headers(&json!(42)).is_empty());
    }
}
