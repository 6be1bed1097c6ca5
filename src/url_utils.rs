//! URL helper functions used throughout the crawler: parsing, canonical
//! normalization, relative resolution, scope checks, and the URL-to-file
//! mapping for saved pages.

use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("malformed URL: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Decomposed URL. Scheme and host are lowercase; the port is present only
/// when it differs from the scheme default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

/// Parse an absolute http(s) URL into its components. Anything else fails.
pub fn parse(url: &str) -> Result<UrlParts, UrlError> {
    let parsed = Url::parse(url).map_err(|_| UrlError::Malformed(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| UrlError::Malformed(url.to_string()))?
        .to_ascii_lowercase();

    Ok(UrlParts {
        scheme: parsed.scheme().to_string(),
        host,
        port: parsed.port(),
        path: parsed.path().to_string(),
        query: parsed.query().unwrap_or_default().to_string(),
        fragment: parsed.fragment().unwrap_or_default().to_string(),
    })
}

/// Canonicalize a URL string, stripping the fragment.
///
/// Normalization lowercases scheme and host, elides default ports, removes
/// `.`/`..`/empty path segments (a trailing slash present on the input is
/// kept; one is never added), and sorts query parameters by key. Unparseable
/// input and non-HTTP schemes are returned unchanged. The operation is
/// idempotent.
pub fn normalize(url: &str) -> String {
    normalize_keep_fragment(url, false)
}

/// Like [`normalize`], optionally retaining the fragment.
pub fn normalize_keep_fragment(url: &str, keep_fragment: bool) -> String {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return url.to_string();
    }
    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return url.to_string(),
    };

    let mut out = String::new();
    out.push_str(parsed.scheme());
    out.push_str("://");
    out.push_str(&host);
    // Url::port() is None when the port matches the scheme default.
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(&normalize_path(parsed.path()));

    let query = sort_query_params(parsed.query().unwrap_or(""));
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }

    if keep_fragment {
        if let Some(fragment) = parsed.fragment() {
            if !fragment.is_empty() {
                out.push('#');
                out.push_str(fragment);
            }
        }
    }

    out
}

/// Remove `.`, `..`, and empty segments from a path. The root path is always
/// `/`; a trailing slash on a non-root input is preserved.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut out = String::new();
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if path.len() > 1 && path.ends_with('/') {
        out.push('/');
    }
    out
}

/// Sort query parameters lexicographically by key. Duplicate keys collapse
/// to the last occurrence; keys without a value serialize bare.
fn sort_query_params(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => params.insert(key.to_string(), value.to_string()),
            None => params.insert(pair.to_string(), String::new()),
        };
    }

    let mut out = String::new();
    for (key, value) in &params {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(key);
        if !value.is_empty() {
            out.push('=');
            out.push_str(value);
        }
    }
    out
}

/// Resolve a possibly-relative link against a base URL and normalize the
/// result. Returns `None` when the base is unparseable or the target falls
/// outside HTTP(S). A fragment-only link keeps its fragment; everything
/// else drops it.
pub fn resolve(base_url: &str, relative: &str) -> Option<String> {
    if relative.is_empty() {
        return Some(base_url.to_string());
    }

    let base = Url::parse(base_url).ok()?;
    let joined = base.join(relative).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }

    let keep_fragment = relative.starts_with('#');
    Some(normalize_keep_fragment(joined.as_str(), keep_fragment))
}

/// Whether a URL falls inside the crawl scope: same domain as
/// `allowed_domain` (or a subdomain of it), and, when `allowed_path_prefix`
/// is non-empty, a path starting with that prefix.
pub fn in_scope(url: &str, allowed_domain: &str, allowed_path_prefix: &str) -> bool {
    let Ok(parts) = parse(url) else {
        return false;
    };

    let allowed = allowed_domain.to_ascii_lowercase();
    if parts.host != allowed && !parts.host.ends_with(&format!(".{}", allowed)) {
        return false;
    }

    if !allowed_path_prefix.is_empty() {
        let path = normalize_path(&parts.path);
        if !path.starts_with(allowed_path_prefix) {
            return false;
        }
    }

    true
}

/// Extract the lowercase host portion of a URL, or empty if unparseable.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Extract the path portion of a URL, or empty if unparseable.
pub fn extract_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

/// Whether the string parses as an http:// or https:// URL.
pub fn is_valid_http_url(url: &str) -> bool {
    matches!(
        Url::parse(url).map(|u| u.scheme().to_string()),
        Ok(ref s) if s == "http" || s == "https"
    )
}

/// The origin (`scheme://host[:port]`) of a URL, or `None` if unparseable.
pub fn extract_origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let mut origin = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        origin.push_str(&format!(":{}", port));
    }
    Some(origin)
}

/// Map a page URL to its output file path:
/// `<base_dir>/<base_domain>/<path with unsafe chars replaced>`, with
/// `.html`/`.htm` rewritten to `.md`, `.md` appended when there is no
/// extension, and `index.md` for the root path.
pub fn url_to_filepath(url: &str, base_domain: &str, base_dir: &str) -> String {
    let path = {
        let p = extract_path(url);
        p.trim_matches('/').to_string()
    };

    let mut safe_path = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' || c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            safe_path.push(c);
        } else {
            safe_path.push('_');
        }
    }

    if safe_path.is_empty() {
        safe_path = "index".to_string();
    }

    let has_extension = match (safe_path.rfind('.'), safe_path.rfind('/')) {
        (Some(dot), Some(slash)) => dot > slash,
        (Some(_), None) => true,
        _ => false,
    };

    if has_extension {
        let dot = safe_path.rfind('.').unwrap_or(safe_path.len());
        let ext = safe_path[dot + 1..].to_ascii_lowercase();
        if ext == "html" || ext == "htm" {
            safe_path.truncate(dot);
            safe_path.push_str(".md");
        }
    } else {
        safe_path.push_str(".md");
    }

    let base = base_dir.trim_end_matches('/');
    if base.is_empty() {
        format!("{}/{}", base_domain, safe_path)
    } else {
        format!("{}/{}/{}", base, base_domain, safe_path)
    }
}
