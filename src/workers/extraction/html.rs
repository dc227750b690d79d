//! Inline `<script>` extraction from rendered HTML.

use anyhow::Result;
use scraper::{Html, Selector};
use url::Url;

/// An inline script body with its 1-based position among non-empty inline
/// scripts on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineScript {
    pub content: String,
    pub index: usize,
}

/// Script `type` values that are data blocks, not executable JavaScript.
const NON_JS_TYPES: [&str; 4] = [
    "application/ld+json",
    "application/json",
    "text/css",
    "text/template",
];

/// Extract every executable inline `<script>` body from an HTML document, in
/// document order. Scripts with a `src` attribute and non-JavaScript script
/// types are skipped; bodies are trimmed and empty ones dropped.
pub fn extract_inline_scripts(html_content: &str) -> Vec<InlineScript> {
    let document = Html::parse_document(html_content);
    let selector = Selector::parse("script").expect("static selector");

    let mut scripts = Vec::new();
    let mut index = 1;

    for element in document.select(&selector) {
        if element.value().attr("src").is_some() {
            continue;
        }

        if let Some(script_type) = element.value().attr("type") {
            let script_type = script_type.trim().to_lowercase();
            if !script_type.is_empty() {
                if NON_JS_TYPES.contains(&script_type.as_str()) {
                    continue;
                }
                if !script_type.contains("javascript") {
                    continue;
                }
            }
        }

        let content = element.text().collect::<String>().trim().to_string();
        if content.is_empty() {
            continue;
        }

        scripts.push(InlineScript { content, index });
        index += 1;
    }

    scripts
}

/// Synthetic URL for the K-th inline script of a page:
/// `<endpoint>/inline_K.js`.
pub fn inline_js_url(base_url: &str, index: usize) -> Result<String> {
    let mut parsed = Url::parse(base_url)?;
    let filename = format!("inline_{index}.js");

    let path = parsed.path().to_string();
    if path.is_empty() || path == "/" {
        parsed.set_path(&format!("/{filename}"));
    } else {
        parsed.set_path(&format!("{}/{}", path.trim_end_matches('/'), filename));
    }
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_inline_script() {
        let html = "<html><body><script>alert(1)</script></body></html>";
        let scripts = extract_inline_scripts(html);
        assert_eq!(
            scripts,
            vec![InlineScript {
                content: "alert(1)".to_string(),
                index: 1
            }]
        );
    }

    #[test]
    fn skips_external_scripts() {
        let html = r#"<html><body><script src="/app.js"></script><script>x()</script></body></html>"#;
        let scripts = extract_inline_scripts(html);
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].content, "x()");
    }

    #[test]
    fn skips_data_block_types() {
        let html = r#"<html><body>
            <script type="application/json">{"a":1}</script>
            <script type="application/ld+json">{}</script>
            <script type="text/template"><b></b></script>
            <script type="text/javascript">run()</script>
        </body></html>"#;
        let scripts = extract_inline_scripts(html);
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].content, "run()");
    }

    #[test]
    fn unrecognized_types_are_skipped() {
        let html = r#"<html><body><script type="module">import x from 'y'</script></body></html>"#;
        assert!(extract_inline_scripts(html).is_empty());
    }

    #[test]
    fn empty_bodies_do_not_consume_indexes() {
        let html = "<html><body><script>  </script><script>first()</script><script>second()</script></body></html>";
        let scripts = extract_inline_scripts(html);
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts[0].index, 1);
        assert_eq!(scripts[0].content, "first()");
        assert_eq!(scripts[1].index, 2);
    }

    #[test]
    fn inline_url_at_root() {
        assert_eq!(
            inline_js_url("http://example.test/", 1).unwrap(),
            "http://example.test/inline_1.js"
        );
    }

    #[test]
    fn inline_url_under_path() {
        assert_eq!(
            inline_js_url("https://a.test/app/page/", 2).unwrap(),
            "https://a.test/app/page/inline_2.js"
        );
        assert_eq!(
            inline_js_url("https://a.test/app/page", 3).unwrap(),
            "https://a.test/app/page/inline_3.js"
        );
    }
}
