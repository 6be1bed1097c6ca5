//! Signature-based detection of documentation generators, used to pick a
//! main-content selector. Results are cached per host: the first framework
//! seen for a host is reused for the rest of the crawl.

use crate::html::{element_text, HtmlDocument};
use crate::url_utils;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    Unknown,
    Docusaurus,
    MkDocs,
    Sphinx,
    GitBook,
    ReadTheDocs,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Unknown => "Unknown",
            Framework::Docusaurus => "Docusaurus",
            Framework::MkDocs => "MkDocs",
            Framework::Sphinx => "Sphinx",
            Framework::GitBook => "GitBook",
            Framework::ReadTheDocs => "ReadTheDocs",
        }
    }
}

/// Selector used when no framework matches.
pub const FALLBACK_SELECTOR: &str = "article, main, body";

#[derive(Debug, Clone)]
pub struct Detection {
    pub framework: Framework,
    pub selector: String,
    pub fallback: bool,
}

pub struct FrameworkSignature {
    pub framework: Framework,
    pub selector: &'static str,
    pub matcher: fn(&HtmlDocument) -> bool,
}

/// Ordered signature list. A signature matches when its CSS probe finds an
/// element or its telltale token appears anywhere in the raw HTML.
pub fn signatures() -> Vec<FrameworkSignature> {
    vec![
        FrameworkSignature {
            framework: Framework::Docusaurus,
            selector: "article, main.mainContainer, div.docMainContainer",
            matcher: |doc| {
                !doc.select(".docusaurus").is_empty() || doc.html_contains("docusaurus")
            },
        },
        FrameworkSignature {
            framework: Framework::Sphinx,
            selector: "div.body, div[role='main'], div.document, article",
            matcher: |doc| !doc.select(".document").is_empty() || doc.html_contains("sphinx"),
        },
        FrameworkSignature {
            framework: Framework::MkDocs,
            selector: "div.md-content, main, article",
            matcher: |doc| !doc.select(".md-content").is_empty() || doc.html_contains("mkdocs"),
        },
        FrameworkSignature {
            framework: Framework::GitBook,
            selector: "div.book, div.book-body, article",
            matcher: |doc| !doc.select(".book").is_empty() || doc.html_contains("gitbook"),
        },
        FrameworkSignature {
            framework: Framework::ReadTheDocs,
            selector: "div.rst-content, div[role='main'], article",
            matcher: |doc| {
                !doc.select(".rst-content").is_empty() || doc.html_contains("read the docs")
            },
        },
    ]
}

#[derive(Default)]
pub struct ContentDetector {
    cache: DashMap<String, Detection>,
}

impl ContentDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect the framework for a page, reusing the cached result for its
    /// host when present.
    pub fn detect(&self, doc: &HtmlDocument, url: &str) -> Detection {
        let host = url_utils::extract_domain(url);
        if !host.is_empty() {
            if let Some(cached) = self.cache.get(&host) {
                return cached.clone();
            }
        }

        let detection = detect_framework(doc);
        if !host.is_empty() {
            tracing::debug!(
                host = %host,
                framework = detection.framework.as_str(),
                "framework detected"
            );
            self.cache.insert(host, detection.clone());
        }
        detection
    }
}

fn detect_framework(doc: &HtmlDocument) -> Detection {
    for signature in signatures() {
        if (signature.matcher)(doc) {
            return Detection {
                framework: signature.framework,
                selector: signature.selector.to_string(),
                fallback: false,
            };
        }
    }
    Detection {
        framework: Framework::Unknown,
        selector: FALLBACK_SELECTOR.to_string(),
        fallback: true,
    }
}

#[derive(Debug, Default)]
pub struct ReadabilityResult {
    pub content: String,
    pub success: bool,
}

/// Last-resort text extraction: the text of the first non-empty hit among
/// `article`, `main`, `body`.
pub fn readability_extract(doc: &HtmlDocument) -> ReadabilityResult {
    for selector in ["article", "main", "body"] {
        if let Some(element) = doc.select_first(selector) {
            let content = element_text(element);
            if !content.is_empty() {
                return ReadabilityResult {
                    content,
                    success: true,
                };
            }
        }
    }
    ReadabilityResult::default()
}
