//! Headless-browser JavaScript extraction over CDP.
//!
//! Drives one browser per extraction job. Sub-requests are intercepted
//! through the Fetch domain and dispatched with a separate HTTP client so
//! user-supplied headers apply and response bodies can be captured; the main
//! document request passes through untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, HeaderEntry, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::GetResourceContentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExtractionOptions, JsExtractor, JsResource, PageCapture, ResourceSource};
use crate::utils::url as urlutil;

/// Time given to the page after navigation before reading the DOM.
const INITIAL_LOAD_WAIT: Duration = Duration::from_secs(3);
/// Additional grace period for late-loaded scripts.
const LATE_SCRIPT_WAIT: Duration = Duration::from_secs(5);
/// Timeout for each intercepted sub-request dispatched out of band.
const SUBREQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Production [`JsExtractor`] backed by a headless Chromium.
pub struct BrowserExtractor;

impl BrowserExtractor {
    pub fn new() -> Self {
        Self
    }

    async fn launch_browser(&self) -> Result<(Browser, tokio::task::JoinHandle<()>)> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-extensions")
            .arg("--disable-default-apps")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .window_size(1366, 768)
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handler_task))
    }
}

impl Default for BrowserExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsExtractor for BrowserExtractor {
    async fn extract(&self, url: &str, options: &ExtractionOptions) -> Result<PageCapture> {
        let (mut browser, handler_task) = self.launch_browser().await?;

        let result = extract_with_browser(&browser, url, options).await;

        let _ = browser.close().await;
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}

async fn extract_with_browser(
    browser: &Browser,
    url: &str,
    options: &ExtractionOptions,
) -> Result<PageCapture> {
    info!("Starting extraction for {}", url);

    let page = browser
        .new_page("about:blank")
        .await
        .context("failed to create page")?;

    let result = extract_on_page(&page, url, options).await;
    let _ = page.close().await;
    result
}

async fn extract_on_page(
    page: &Page,
    url: &str,
    options: &ExtractionOptions,
) -> Result<PageCapture> {
    if options.mobile {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(430)
            .height(932)
            .device_scale_factor(3.0)
            .mobile(true)
            .build()
            .map_err(|e| anyhow!("invalid device metrics: {e}"))?;
        if let Err(e) = page.execute(metrics).await {
            warn!("Failed to set mobile viewport: {}", e);
        }
    }

    if let Some(user_agent) = options.headers.get("User-Agent") {
        if let Err(e) = page
            .execute(SetUserAgentOverrideParams::new(user_agent.clone()))
            .await
        {
            warn!("Failed to set user agent: {}", e);
        }
    }

    // Shared sink the interceptor task appends network-sourced JS into.
    let resources: Arc<Mutex<Vec<JsResource>>> = Arc::new(Mutex::new(Vec::new()));
    let interceptor = spawn_request_interceptor(page, url, options, resources.clone()).await?;

    // Navigate, then give the page time to settle; no load-event wait, some
    // targets never fire it.
    page.goto(url).await.context("navigation failed")?;
    tokio::time::sleep(INITIAL_LOAD_WAIT).await;
    tokio::time::sleep(LATE_SCRIPT_WAIT).await;

    let html = match page.content().await {
        Ok(html) => html,
        Err(e) => {
            warn!("Failed to get HTML content: {}", e);
            String::new()
        }
    };

    let dom_resources = collect_dom_scripts(page, url).await;

    interceptor.abort();

    let mut captured = resources.lock().await.clone();
    captured.extend(dom_resources);

    info!(
        "Successfully extracted {} JavaScript resources from {}",
        captured.len(),
        url
    );
    Ok(PageCapture {
        html,
        resources: captured,
    })
}

/// Install Fetch-domain interception and spawn the task that services paused
/// requests. The main document request continues unmodified; every other
/// request is dispatched through a reqwest client with the user headers
/// applied, then fulfilled (or failed) in the browser.
async fn spawn_request_interceptor(
    page: &Page,
    main_url: &str,
    options: &ExtractionOptions,
    resources: Arc<Mutex<Vec<JsResource>>>,
) -> Result<tokio::task::JoinHandle<()>> {
    let mut request_events = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("failed to listen for paused requests")?;

    page.execute(
        EnableParams::builder()
            .pattern(RequestPattern::builder().url_pattern("*").build())
            .build(),
    )
    .await
    .context("failed to enable request interception")?;

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(SUBREQUEST_TIMEOUT)
        .build()
        .unwrap_or_default();

    let page = page.clone();
    let main_url = main_url.to_string();
    let headers = options.headers.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = request_events.next().await {
            let request_id = event.request_id.clone();
            let request_url = event.request.url.clone();
            let method = event.request.method.clone();

            if request_url == main_url {
                let _ = page
                    .execute(ContinueRequestParams::new(request_id))
                    .await;
                continue;
            }

            match relay_request(&client, &method, &request_url, &headers).await {
                Ok(relayed) => {
                    if is_javascript_resource(&relayed.content_type, &request_url)
                        && !relayed.body.is_empty()
                    {
                        resources.lock().await.push(JsResource {
                            url: request_url.clone(),
                            content: String::from_utf8_lossy(&relayed.body).into_owned(),
                            source: ResourceSource::Network,
                        });
                    }

                    let fulfill = FulfillRequestParams::builder()
                        .request_id(request_id.clone())
                        .response_code(relayed.status as i64)
                        .response_headers(relayed.headers)
                        .body(BASE64.encode(&relayed.body))
                        .build();
                    match fulfill {
                        Ok(params) => {
                            let _ = page.execute(params).await;
                        }
                        Err(_) => {
                            let _ = page
                                .execute(FailRequestParams::new(request_id, ErrorReason::Failed))
                                .await;
                        }
                    }
                }
                Err(e) => {
                    debug!("Sub-request {} failed: {}", request_url, e);
                    let _ = page
                        .execute(FailRequestParams::new(request_id, ErrorReason::Failed))
                        .await;
                }
            }
        }
    }))
}

struct RelayedResponse {
    status: u16,
    content_type: String,
    headers: Vec<HeaderEntry>,
    body: Vec<u8>,
}

async fn relay_request(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    user_headers: &HashMap<String, String>,
) -> Result<RelayedResponse> {
    let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut request = client.request(method, url);
    for (name, value) in user_headers {
        if !value.is_empty() {
            request = request.header(name, value);
        }
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| HeaderEntry {
                name: name.to_string(),
                value: v.to_string(),
            })
        })
        .collect();
    let body = response.bytes().await?.to_vec();

    Ok(RelayedResponse {
        status,
        content_type,
        headers,
        body,
    })
}

/// Whether a sub-response should be captured as JavaScript: JS content type
/// or `.js` URL, with JSON explicitly excluded either way.
pub(crate) fn is_javascript_resource(content_type: &str, url: &str) -> bool {
    let content_type_lower = content_type.to_lowercase();
    let url_lower = url.to_lowercase();

    if content_type_lower.contains("json") || url_lower.ends_with(".json") {
        return false;
    }

    content_type_lower.contains("javascript") || url_lower.ends_with(".js")
}

/// Resolve every `<script src>` in the DOM and read its body from the
/// browser's resource cache.
async fn collect_dom_scripts(page: &Page, base_url: &str) -> Vec<JsResource> {
    let mut collected = Vec::new();

    let elements = match page.find_elements("script[src]").await {
        Ok(elements) => elements,
        Err(_) => return collected,
    };

    let frame_id = match page.mainframe().await {
        Ok(Some(frame_id)) => frame_id,
        _ => return collected,
    };

    for element in elements {
        let src = match element.attribute("src").await {
            Ok(Some(src)) if !src.is_empty() => src,
            _ => continue,
        };

        let script_url = urlutil::normalize_url(&src, base_url);
        let params = GetResourceContentParams::new(frame_id.clone(), script_url.clone());
        let content = match page.execute(params).await {
            Ok(response) => {
                let result = response.result;
                if result.base64_encoded {
                    BASE64
                        .decode(result.content.as_bytes())
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_default()
                } else {
                    result.content
                }
            }
            Err(_) => continue,
        };

        if !content.is_empty() {
            collected.push(JsResource {
                url: script_url,
                content,
                source: ResourceSource::Dom,
            });
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn javascript_detected_by_content_type() {
        assert!(is_javascript_resource("application/javascript", "https://a.test/x"));
        assert!(is_javascript_resource("text/javascript; charset=utf-8", "https://a.test/x"));
    }

    #[test]
    fn javascript_detected_by_extension() {
        assert!(is_javascript_resource("application/octet-stream", "https://a.test/bundle.js"));
    }

    #[test]
    fn json_is_excluded_even_with_js_extension() {
        assert!(!is_javascript_resource("application/json", "https://a.test/data.js"));
        assert!(!is_javascript_resource("text/javascript", "https://a.test/manifest.json"));
    }

    #[test]
    fn html_is_not_javascript() {
        assert!(!is_javascript_resource("text/html", "https://a.test/page"));
    }
}
