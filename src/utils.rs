//! Hashing and filename/path sanitation helpers used by the store keys,
//! content records, and output writers.

use md5::Md5;
use sha2::{Digest, Sha256};

/// Render a digest as lowercase hex.
fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// 128-bit fingerprint of a normalized URL, used for store keys and image
/// filenames. Collisions are tolerated as dedup noise.
pub fn url_hash(normalized_url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(normalized_url.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// SHA-256 of page content, used for incremental re-crawl short-circuits.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are unsafe in filenames with underscores and
/// collapse runs of underscores.
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "unnamed".to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut last_was_underscore = false;
    for c in input.chars() {
        let mapped = if INVALID_FILENAME_CHARS.contains(&c) || (c as u32) < 32 {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if !last_was_underscore {
                out.push('_');
            }
            last_was_underscore = true;
        } else {
            out.push(mapped);
            last_was_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == ' ').to_string();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

/// Escape a value for a tab-separated mapping file.
pub fn escape_tsv(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Collapse all whitespace runs to single spaces and trim the ends.
pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_is_stable_128_bit_hex() {
        let hash = url_hash("https://example.com/docs");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, url_hash("https://example.com/docs"));
        assert_ne!(hash, url_hash("https://example.com/other"));
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_hash_known_value() {
        // SHA-256 of the empty string
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("hello").len(), 64);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
        assert_eq!(sanitize_filename("a///b"), "a_b");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("..."), "unnamed");
        assert_eq!(sanitize_filename("normal-name.md"), "normal-name.md");
    }

    #[test]
    fn test_escape_tsv() {
        assert_eq!(escape_tsv("a\tb\nc"), "a\\tb\\nc");
        assert_eq!(escape_tsv("plain"), "plain");
        assert_eq!(escape_tsv("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \t b\n\nc "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
    }
}
