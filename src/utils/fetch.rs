//! Rate-limited HTTP asset fetcher.
//!
//! Fetches JS assets, sourcemaps and chunks outside the browser. Sends a
//! fixed desktop Chrome identity, accepts gzip (decoding by header or by the
//! `1F 8B` magic bytes when servers mislabel), and skips TLS certificate
//! verification since reconnaissance targets routinely present broken chains.
//! All requests through one instance share a 30-requests-per-minute cap.

use std::io::Read;
use std::time::Duration;

use anyhow::Result;
use flate2::read::GzDecoder;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

const REQUESTS_PER_MINUTE: u32 = 30;

/// Result of a fetch: decoded body plus enough response metadata for the
/// callers' content filters.
#[derive(Debug)]
pub struct FetchedAsset {
    pub body: Vec<u8>,
    pub content_type: String,
    pub status: u16,
}

impl FetchedAsset {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Evenly spaced rate gate: one permit every `interval`.
struct RateGate {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    fn per_minute(permits: u32) -> Self {
        Self {
            interval: Duration::from_secs(60) / permits,
            next_slot: Mutex::new(None),
        }
    }

    async fn take(&self) {
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

/// HTTP fetcher with a shared per-instance rate limit.
pub struct AssetFetcher {
    client: reqwest::Client,
    gate: RateGate,
}

impl AssetFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            gate: RateGate::per_minute(REQUESTS_PER_MINUTE),
        }
    }

    /// GET a URL, honouring the rate limit.
    pub async fn rate_limited_get(&self, url: &str) -> Result<FetchedAsset> {
        self.gate.take().await;
        self.request(url).await
    }

    async fn request(&self, url: &str) -> Result<FetchedAsset> {
        debug!("Fetching asset {}", url);

        let response = self
            .client
            .get(url)
            .header("accept", "*/*")
            .header("accept-language", "en-GB,en-US;q=0.9,en;q=0.8")
            .header("sec-fetch-site", "same-origin")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-dest", "script")
            .header("user-agent", USER_AGENT)
            .header("accept-encoding", "gzip")
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content_encoding = response
            .headers()
            .get("content-encoding")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let raw = response.bytes().await?.to_vec();
        let body = decode_body(raw, &content_encoding);

        Ok(FetchedAsset {
            body,
            content_type,
            status,
        })
    }
}

impl Default for AssetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Decompress gzip bodies, detected by header or by magic bytes. Bodies that
/// fail to decompress are returned as-is.
fn decode_body(raw: Vec<u8>, content_encoding: &str) -> Vec<u8> {
    let is_gzipped = content_encoding.contains("gzip")
        || (raw.len() > 2 && raw[0] == 0x1f && raw[1] == 0x8b);
    if !is_gzipped {
        return raw;
    }

    let mut decoder = GzDecoder::new(raw.as_slice());
    let mut decoded = Vec::new();
    match decoder.read_to_end(&mut decoded) {
        Ok(_) => decoded,
        Err(_) => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decode_body_passes_plain_through() {
        assert_eq!(decode_body(b"plain".to_vec(), ""), b"plain");
    }

    #[test]
    fn decode_body_by_content_encoding() {
        let compressed = gzip(b"console.log(1)");
        assert_eq!(decode_body(compressed, "gzip"), b"console.log(1)");
    }

    #[test]
    fn decode_body_by_magic_bytes() {
        let compressed = gzip(b"console.log(2)");
        // No content-encoding header, but magic bytes present.
        assert_eq!(decode_body(compressed, ""), b"console.log(2)");
    }

    #[test]
    fn decode_body_keeps_undecodable_payload() {
        // Magic bytes but truncated stream: fall back to raw bytes.
        let bogus = vec![0x1f, 0x8b, 0x00, 0x01];
        assert_eq!(decode_body(bogus.clone(), ""), bogus);
    }

    #[tokio::test]
    async fn rate_gate_spaces_permits() {
        let gate = RateGate {
            interval: Duration::from_millis(20),
            next_slot: Mutex::new(None),
        };
        let start = Instant::now();
        gate.take().await;
        gate.take().await;
        gate.take().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
