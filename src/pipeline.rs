//! Content pipeline: select the main region, convert it to markdown,
//! harvest links and images, and sink the result to disk.

use crate::config::SiteConfig;
use crate::detector::{readability_extract, ContentDetector};
use crate::html::{attr, select_within, HtmlDocument};
use crate::markdown::convert_element;
use crate::models::{ErrorKind, ImageRecord, ImageStatus, ProcessResult};
use crate::store::VisitedStore;
use crate::url_utils;
use crate::utils;
use std::path::Path;
use std::sync::Arc;

/// Rough token estimate: about four characters per token, rounded up.
pub fn count_tokens(text: &str) -> u32 {
    ((text.len() + 3) / 4) as u32
}

pub struct ContentProcessor {
    detector: ContentDetector,
    store: Arc<dyn VisitedStore>,
    output_base_dir: String,
}

impl ContentProcessor {
    pub fn new(store: Arc<dyn VisitedStore>, output_base_dir: impl Into<String>) -> Self {
        Self {
            detector: ContentDetector::new(),
            store,
            output_base_dir: output_base_dir.into(),
        }
    }

    /// Run the full pipeline for one fetched HTML page. On success a file
    /// exists at `saved_file_path`; on failure nothing was written.
    pub fn process(
        &self,
        doc: &HtmlDocument,
        final_url: &str,
        site: &SiteConfig,
        skip_images: bool,
    ) -> ProcessResult {
        let mut result = ProcessResult {
            title: doc.title().unwrap_or_default(),
            ..Default::default()
        };

        let selector = if site.is_auto_selector() {
            self.detector.detect(doc, final_url).selector
        } else {
            site.content_selector.clone()
        };

        let content_element = doc.select_first(&selector);
        result.markdown = match content_element {
            Some(element) => convert_element(element),
            None => {
                let fallback = readability_extract(doc);
                if fallback.success {
                    let mut text = fallback.content;
                    text.push('\n');
                    text
                } else {
                    String::new()
                }
            }
        };

        if result.markdown.trim().is_empty() {
            result.error = "content not found".to_string();
            result.error_kind = ErrorKind::ContentEmpty;
            return result;
        }

        result.content_hash = utils::content_hash(&result.markdown);
        result.token_count = count_tokens(&result.markdown);
        result.extracted_links = self.harvest_links(doc, site);

        if let Some(element) = content_element {
            if !skip_images {
                result.image_urls = self.harvest_images(element, site);
            }
        }

        result.saved_file_path =
            url_utils::url_to_filepath(final_url, &site.allowed_domain, &self.output_base_dir);
        if let Err(e) = self.write_output(&result.saved_file_path, &result.markdown) {
            result.error = format!("failed to write output file: {}", e);
            result.error_kind = ErrorKind::IoError;
            result.saved_file_path.clear();
            return result;
        }

        result.success = true;
        result
    }

    /// All `<a href>` values in the document, raw. Anchors marked
    /// `rel="nofollow"` are dropped when the site honors nofollow.
    fn harvest_links(&self, doc: &HtmlDocument, site: &SiteConfig) -> Vec<String> {
        doc.select("a")
            .into_iter()
            .filter_map(|anchor| {
                let href = attr(anchor, "href");
                if href.is_empty() {
                    return None;
                }
                if site.respect_nofollow {
                    let rel = attr(anchor, "rel");
                    if rel.split_whitespace().any(|token| token == "nofollow") {
                        return None;
                    }
                }
                Some(href)
            })
            .collect()
    }

    /// `<img src>` values inside the content element. Each gets a
    /// persisted record: `Pending` for allowed domains, `InvalidDomain`
    /// otherwise. Downloads themselves are deferred.
    fn harvest_images(
        &self,
        content: scraper::ElementRef<'_>,
        site: &SiteConfig,
    ) -> Vec<String> {
        let site_output_dir = format!(
            "{}/{}",
            self.output_base_dir.trim_end_matches('/'),
            site.allowed_domain
        );

        let mut urls = Vec::new();
        for img in select_within(content, "img") {
            let src = attr(img, "src");
            if src.is_empty() {
                continue;
            }

            let mut record = ImageRecord::new(&src);
            record.local_path = format!(
                "{}/images/img_{}.bin",
                site_output_dir,
                utils::url_hash(&src)
            );
            record.caption = attr(img, "alt");

            let domain = url_utils::extract_domain(&src);
            if !domain.is_empty() && !site.is_image_domain_allowed(&domain) {
                record.mark_skipped(ImageStatus::InvalidDomain);
            }

            if let Err(e) = self.store.update_image_status(&src, &record) {
                tracing::warn!("failed to persist image record for {}: {}", src, e);
            }
            urls.push(src);
        }
        urls
    }

    fn write_output(&self, path: &str, markdown: &str) -> std::io::Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, markdown)
    }
}
