//! Deliberately minimal HTML-to-markdown conversion: headings, paragraphs,
//! and the basic inline marks survive; every other tag is stripped to its
//! text. Runs of three or more blank lines collapse to two.

use regex::Regex;
use scraper::{ElementRef, Node};
use std::sync::OnceLock;

/// Convert a content element to canonical markdown text.
pub fn convert_element(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    render(element, &mut out);

    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let re = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let collapsed = re.replace_all(&out, "\n\n");

    let mut result: String = collapsed
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    result = result.trim().to_string();
    if !result.is_empty() {
        result.push('\n');
    }
    result
}

/// Convert a standalone HTML fragment (test and tooling convenience).
pub fn convert_fragment(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    convert_element(fragment.root_element())
}

fn render(element: ElementRef<'_>, out: &mut String) {
    match element.value().name() {
        "script" | "style" | "noscript" => {}
        "h1" => render_heading(element, out, "# "),
        "h2" => render_heading(element, out, "## "),
        "h3" => render_heading(element, out, "### "),
        "p" => {
            start_block(out);
            render_children(element, out);
            end_block(out);
        }
        "strong" | "b" => render_inline_wrapped(element, out, "**", "**"),
        "em" | "i" => render_inline_wrapped(element, out, "*", "*"),
        "code" => render_inline_wrapped(element, out, "`", "`"),
        "br" => out.push('\n'),
        _ => render_children(element, out),
    }
}

fn render_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn render_heading(element: ElementRef<'_>, out: &mut String, prefix: &str) {
    let mut inner = String::new();
    render_children(element, &mut inner);
    let line = inner.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        return;
    }
    start_block(out);
    out.push_str(prefix);
    out.push_str(&line);
    end_block(out);
}

fn render_inline_wrapped(element: ElementRef<'_>, out: &mut String, open: &str, close: &str) {
    let mut inner = String::new();
    render_children(element, &mut inner);
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return;
    }
    if needs_space(out) {
        out.push(' ');
    }
    out.push_str(open);
    out.push_str(trimmed);
    out.push_str(close);
}

/// Append a text node, collapsing internal whitespace runs while keeping
/// single spaces at the boundaries where the source had them.
fn push_text(out: &mut String, text: &str) {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        if needs_space(out) {
            out.push(' ');
        }
        return;
    }
    if text.starts_with(char::is_whitespace) && needs_space(out) {
        out.push(' ');
    }
    out.push_str(&collapsed);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn needs_space(out: &str) -> bool {
    !out.is_empty() && !out.ends_with([' ', '\n'])
}

fn start_block(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with("\n\n") {
        while out.ends_with('\n') {
            out.pop();
        }
        out.push_str("\n\n");
    }
}

fn end_block(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    out.push_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings() {
        let md = convert_fragment("<h1>Title</h1><h2>Section</h2><h3>Sub</h3>");
        assert_eq!(md, "# Title\n\n## Section\n\n### Sub\n");
    }

    #[test]
    fn test_paragraphs_become_blocks() {
        let md = convert_fragment("<p>First para.</p><p>Second para.</p>");
        assert_eq!(md, "First para.\n\nSecond para.\n");
    }

    #[test]
    fn test_inline_marks() {
        let md = convert_fragment("<p>Use <strong>bold</strong> and <em>italic</em> and <code>run()</code>.</p>");
        assert_eq!(md, "Use **bold** and *italic* and `run()`.\n");
    }

    #[test]
    fn test_b_and_i_aliases() {
        let md = convert_fragment("<p><b>bold</b> <i>italic</i></p>");
        assert_eq!(md, "**bold** *italic*\n");
    }

    #[test]
    fn test_unknown_tags_are_stripped() {
        let md = convert_fragment(
            "<section><span>inline</span> <blockquote>quoted</blockquote></section>",
        );
        assert!(md.contains("inline"));
        assert!(md.contains("quoted"));
        assert!(!md.contains('<'));
    }

    #[test]
    fn test_script_and_style_dropped() {
        let md = convert_fragment("<p>keep</p><script>drop()</script><style>.x{}</style>");
        assert_eq!(md, "keep\n");
    }

    #[test]
    fn test_blank_line_runs_collapse() {
        let md = convert_fragment("<p>a</p><div></div><div></div><p>b</p>");
        assert!(!md.contains("\n\n\n"));
        assert_eq!(md, "a\n\nb\n");
    }

    #[test]
    fn test_whitespace_in_source_collapses() {
        let md = convert_fragment("<p>spread\n   across\n   lines</p>");
        assert_eq!(md, "spread across lines\n");
    }

    #[test]
    fn test_heading_with_inline_markup() {
        let md = convert_fragment("<h2>The <code>fetch</code> API</h2>");
        assert_eq!(md, "## The `fetch` API\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(convert_fragment(""), "");
        assert_eq!(convert_fragment("<div></div>"), "");
    }
}
