//! Sitemap XML parsing: `<urlset>` documents and `<sitemapindex>`
//! indirection, enough to seed a crawl from robots.txt-advertised sitemaps.

use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapRef {
    pub loc: String,
    pub lastmod: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapType {
    UrlSet,
    Index,
    Unknown,
}

/// Identify a sitemap document by its root element.
pub fn detect_type(xml: &str) -> SitemapType {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                return match e.name().as_ref() {
                    b"urlset" => SitemapType::UrlSet,
                    b"sitemapindex" => SitemapType::Index,
                    _ => SitemapType::Unknown,
                };
            }
            Ok(Event::Eof) | Err(_) => return SitemapType::Unknown,
            _ => {}
        }
    }
}

/// Extract `<url>` entries from a `<urlset>` document. Malformed input
/// yields the entries parsed so far.
pub fn parse_urlset(xml: &str) -> Vec<SitemapUrl> {
    parse_entries(xml, b"url")
        .into_iter()
        .map(|(loc, lastmod)| SitemapUrl { loc, lastmod })
        .collect()
}

/// Extract `<sitemap>` entries from a `<sitemapindex>` document.
pub fn parse_index(xml: &str) -> Vec<SitemapRef> {
    parse_entries(xml, b"sitemap")
        .into_iter()
        .map(|(loc, lastmod)| SitemapRef { loc, lastmod })
        .collect()
}

fn parse_entries(xml: &str, entry_tag: &[u8]) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();

    let mut in_entry = false;
    let mut current_field: Option<u8> = None; // b'l' = loc, b'm' = lastmod
    let mut loc = String::new();
    let mut lastmod = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if name == entry_tag {
                    in_entry = true;
                    loc.clear();
                    lastmod.clear();
                } else if in_entry && name == b"loc" {
                    current_field = Some(b'l');
                } else if in_entry && name == b"lastmod" {
                    current_field = Some(b'm');
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(field) = current_field {
                    let text = t.unescape().unwrap_or_default();
                    let text = text.trim();
                    match field {
                        b'l' => loc.push_str(text),
                        _ => lastmod.push_str(text),
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if name == entry_tag {
                    in_entry = false;
                    if !loc.is_empty() {
                        entries.push((loc.clone(), lastmod.clone()));
                    }
                } else if name == b"loc" || name == b"lastmod" {
                    current_field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    entries
}
