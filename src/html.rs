//! Thin wrapper over `scraper` exposing the narrow selector surface the
//! crawler needs: tag / `.class` / `#id` probes (and comma unions of those),
//! first-match lookup, and text extraction that skips script-like subtrees.

use scraper::{ElementRef, Html, Node, Selector};

/// A parsed HTML page plus its raw source (kept for substring probes used
/// by framework detection).
pub struct HtmlDocument {
    document: Html,
    raw_html: String,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
            raw_html: html.to_string(),
        }
    }

    /// All elements matching the selector, in document order. Invalid
    /// selectors yield no matches.
    pub fn select(&self, selector: &str) -> Vec<ElementRef<'_>> {
        match Selector::parse(selector) {
            Ok(sel) => self.document.select(&sel).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// First element matching the selector, if any.
    pub fn select_first(&self, selector: &str) -> Option<ElementRef<'_>> {
        let sel = Selector::parse(selector).ok()?;
        self.document.select(&sel).next()
    }

    /// Case-insensitive substring scan over the raw HTML.
    pub fn html_contains(&self, needle: &str) -> bool {
        self.raw_html
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }

    pub fn raw_html(&self) -> &str {
        &self.raw_html
    }

    /// The `<title>` text with whitespace collapsed, if present and
    /// non-empty.
    pub fn title(&self) -> Option<String> {
        self.select_first("title")
            .map(|el| crate::utils::normalize_whitespace(&element_text(el)))
            .filter(|t| !t.is_empty())
    }
}

/// Elements matching `selector` inside a subtree.
pub fn select_within<'a>(element: ElementRef<'a>, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => element.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

/// Collect descendant text of an element, skipping `script`, `style`, and
/// `noscript` subtrees. Text chunks are joined with single spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut chunks: Vec<String> = Vec::new();
    collect_text(element, &mut chunks);
    chunks.join(" ")
}

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript"];

fn collect_text(element: ElementRef<'_>, out: &mut Vec<String>) {
    if SKIPPED_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Attribute value by name, empty when absent.
pub fn attr(element: ElementRef<'_>, name: &str) -> String {
    element.value().attr(name).unwrap_or_default().to_string()
}

/// Whether the whitespace-tokenized `class` attribute contains the token.
pub fn has_class(element: ElementRef<'_>, class_name: &str) -> bool {
    element
        .value()
        .attr("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><head><title> Sample Page </title><style>.x{color:red}</style></head>
        <body>
          <main class="content primary">
            <h1 id="intro">Intro</h1>
            <p>Hello <em>world</em></p>
            <script>var ignored = true;</script>
          </main>
          <div class="content">secondary</div>
        </body></html>
    "#;

    #[test]
    fn test_select_by_tag() {
        let doc = HtmlDocument::parse(SAMPLE);
        assert_eq!(doc.select("p").len(), 1);
        assert!(doc.select_first("main").is_some());
        assert!(doc.select_first("article").is_none());
    }

    #[test]
    fn test_select_by_class_and_id() {
        let doc = HtmlDocument::parse(SAMPLE);
        assert_eq!(doc.select(".content").len(), 2);
        assert_eq!(doc.select("div.content").len(), 1);
        assert!(doc.select_first("#intro").is_some());
        assert!(doc.select_first("h1#intro").is_some());
        assert!(doc.select_first("h2#intro").is_none());
    }

    #[test]
    fn test_select_union() {
        let doc = HtmlDocument::parse(SAMPLE);
        // Union returns matches in document order; main comes before div.
        let matches = doc.select("article, main, div.content");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].value().name(), "main");
    }

    #[test]
    fn test_element_text_skips_script_and_style() {
        let doc = HtmlDocument::parse(SAMPLE);
        let main = doc.select_first("main").unwrap();
        let text = element_text(main);
        assert!(text.contains("Intro"));
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_text_joins_with_spaces() {
        let doc = HtmlDocument::parse("<p>a<b>b</b>c</p>");
        let p = doc.select_first("p").unwrap();
        assert_eq!(element_text(p), "a b c");
    }

    #[test]
    fn test_attr_and_has_class() {
        let doc = HtmlDocument::parse(SAMPLE);
        let main = doc.select_first("main").unwrap();
        assert_eq!(attr(main, "class"), "content primary");
        assert_eq!(attr(main, "missing"), "");
        assert!(has_class(main, "content"));
        assert!(has_class(main, "primary"));
        assert!(!has_class(main, "cont"));
    }

    #[test]
    fn test_html_contains() {
        let doc = HtmlDocument::parse(SAMPLE);
        assert!(doc.html_contains("SAMPLE page"));
        assert!(!doc.html_contains("docusaurus"));
    }

    #[test]
    fn test_title() {
        let doc = HtmlDocument::parse(SAMPLE);
        assert_eq!(doc.title(), Some("Sample Page".to_string()));
        let untitled = HtmlDocument::parse("<html><body></body></html>");
        assert_eq!(untitled.title(), None);
    }

    #[test]
    fn test_select_within() {
        let doc = HtmlDocument::parse(SAMPLE);
        let main = doc.select_first("main").unwrap();
        assert_eq!(select_within(main, "p").len(), 1);
        assert!(select_within(main, "div.content").is_empty());
    }
}
