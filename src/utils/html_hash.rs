//! Structural hashing of HTML pages.
//!
//! Two pages with identical structure but different dynamic content (nonces,
//! timestamps, injected scripts) must hash identically, so the page is
//! normalized before hashing: scripts, styles, meta tags and comments are
//! dropped, all attributes except `href`/`src` are stripped, dynamic
//! substrings are scrubbed from text, and whitespace is collapsed.

use std::sync::OnceLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::node::Node;
use scraper::Html;

use super::hash::sha256_hex;

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .expect("static regex")
    })
}

fn iso_timestamp_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}T?\d{2}:\d{2}:\d{2}(Z|[+-]\d{2}:\d{2})?")
            .expect("static regex")
    })
}

fn nonce_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"nonce-[0-9a-f]+").expect("static regex"))
}

const DROPPED_ELEMENTS: [&str; 3] = ["script", "style", "meta"];
const KEPT_ATTRIBUTES: [&str; 2] = ["href", "src"];

/// Normalize an HTML document and return the hex-encoded SHA-256 of the
/// normalized form.
pub fn structural_hash(html_content: &str) -> String {
    let document = Html::parse_document(html_content);
    let mut normalized = String::new();
    render_normalized(document.tree.root(), &mut normalized);

    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    sha256_hex(collapsed.as_bytes())
}

fn render_normalized(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(element) => {
            let name = element.name();
            if DROPPED_ELEMENTS.contains(&name) {
                return;
            }
            out.push('<');
            out.push_str(name);
            for attr in KEPT_ATTRIBUTES {
                if let Some(value) = element.attr(attr) {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    out.push_str(value);
                    out.push('"');
                }
            }
            out.push('>');
            for child in node.children() {
                render_normalized(child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::Text(text) => {
            out.push_str(&scrub_dynamic_text(text));
            out.push(' ');
        }
        Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => {}
        Node::Document | Node::Fragment => {
            for child in node.children() {
                render_normalized(child, out);
            }
        }
    }
}

fn scrub_dynamic_text(text: &str) -> String {
    let text = uuid_pattern().replace_all(text, "");
    let text = iso_timestamp_pattern().replace_all(&text, "");
    nonce_pattern().replace_all(&text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_idempotent() {
        let html = "<html><body><p>hello</p></body></html>";
        assert_eq!(structural_hash(html), structural_hash(html));
    }

    #[test]
    fn script_content_does_not_affect_hash() {
        let a = "<html><body><script>alert(1)</script><p>x</p></body></html>";
        let b = "<html><body><script>alert(2)</script><p>x</p></body></html>";
        let c = "<html><body><p>x</p></body></html>";
        assert_eq!(structural_hash(a), structural_hash(b));
        assert_eq!(structural_hash(a), structural_hash(c));
    }

    #[test]
    fn reordered_scripts_do_not_change_hash() {
        let a = "<html><body><script src=\"a.js\"></script><script src=\"b.js\"></script><p>x</p></body></html>";
        let b = "<html><body><script src=\"b.js\"></script><script src=\"a.js\"></script><p>x</p></body></html>";
        assert_eq!(structural_hash(a), structural_hash(b));
    }

    #[test]
    fn non_essential_attributes_are_ignored() {
        let a = "<html><body><div class=\"a\" id=\"x\"><a href=\"/l\">l</a></div></body></html>";
        let b = "<html><body><div class=\"b\" data-r=\"9\"><a href=\"/l\">l</a></div></body></html>";
        assert_eq!(structural_hash(a), structural_hash(b));
    }

    #[test]
    fn href_changes_do_change_hash() {
        let a = "<html><body><a href=\"/one\">l</a></body></html>";
        let b = "<html><body><a href=\"/two\">l</a></body></html>";
        assert_ne!(structural_hash(a), structural_hash(b));
    }

    #[test]
    fn dynamic_text_is_scrubbed() {
        let a = "<html><body><p>id 123e4567-e89b-12d3-a456-426614174000 at 2024-01-02T10:11:12Z</p></body></html>";
        let b = "<html><body><p>id 00000000-0000-0000-0000-000000000000 at 2025-06-07T01:02:03Z</p></body></html>";
        assert_eq!(structural_hash(a), structural_hash(b));
    }

    #[test]
    fn meta_and_style_are_dropped() {
        let a = "<html><head><meta charset=\"utf-8\"><style>p{}</style></head><body><p>x</p></body></html>";
        let b = "<html><head></head><body><p>x</p></body></html>";
        assert_eq!(structural_hash(a), structural_hash(b));
    }
}
