//! Status enums, persisted records, and transient result types shared
//! across the crawl engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a page record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Unknown,
    Pending,
    InProgress,
    Success,
    Failure,
    NotFound,
    OutOfScope,
    RobotsDisallowed,
}

/// Processing status of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    #[default]
    Unknown,
    Pending,
    InProgress,
    Success,
    Failure,
    Skipped,
    TooLarge,
    InvalidDomain,
}

/// Classification of why a page or image failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    None,
    NetworkError,
    TimeoutError,
    HttpError,
    ParseError,
    SelectorNotFound,
    ContentEmpty,
    IoError,
    RateLimited,
    RobotsDisallowed,
    OutOfScope,
    MaxRetriesExceeded,
    Unknown,
}

/// Timestamps persist as ISO-8601 with millisecond precision and a `Z`
/// suffix, e.g. `2026-08-02T10:15:30.123Z`.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub(crate) mod ts_millis {
    use super::TIMESTAMP_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod ts_millis_opt {
    use super::TIMESTAMP_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => ser.serialize_some(&dt.format(TIMESTAMP_FORMAT).to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let opt = Option::<String>::deserialize(de)?;
        match opt {
            Some(s) => NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
                .map(|naive| Some(naive.and_utc()))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Unit of work in the crawl queue. Lower priority values pop first;
/// priority defaults to depth, which yields breadth-first order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    pub normalized_url: Option<String>,
    pub depth: u32,
    pub priority: i64,
    #[serde(with = "ts_millis")]
    pub discovered_at: DateTime<Utc>,
    pub referrer: Option<String>,
}

impl WorkItem {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            normalized_url: None,
            depth,
            priority: depth as i64,
            discovered_at: Utc::now(),
            referrer: None,
        }
    }

    pub fn with_priority(url: impl Into<String>, depth: u32, priority: i64) -> Self {
        Self {
            priority,
            ..Self::new(url, depth)
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

/// Persisted record for a page, keyed by `p:<hash(normalized_url)>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub status: PageStatus,
    pub error_kind: ErrorKind,
    pub error_message: String,
    #[serde(with = "ts_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_millis_opt")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(with = "ts_millis")]
    pub last_attempt: DateTime<Utc>,
    pub depth: u32,
    pub attempt_count: u32,
    pub content_hash: String,
    pub normalized_url: String,
    pub final_url: String,
    pub local_file_path: String,
    pub token_count: u32,
}

impl PageRecord {
    pub fn new(normalized_url: impl Into<String>, depth: u32) -> Self {
        let now = Utc::now();
        Self {
            status: PageStatus::Pending,
            error_kind: ErrorKind::None,
            error_message: String::new(),
            created_at: now,
            processed_at: None,
            last_attempt: now,
            depth,
            attempt_count: 0,
            content_hash: String::new(),
            normalized_url: normalized_url.into(),
            final_url: String::new(),
            local_file_path: String::new(),
            token_count: 0,
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = PageStatus::InProgress;
        self.last_attempt = Utc::now();
    }

    pub fn mark_success(&mut self, content_hash: String, file_path: String, tokens: u32) {
        self.status = PageStatus::Success;
        self.error_kind = ErrorKind::None;
        self.error_message.clear();
        self.processed_at = Some(Utc::now());
        self.content_hash = content_hash;
        self.local_file_path = file_path;
        self.token_count = tokens;
    }

    pub fn mark_failure(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = PageStatus::Failure;
        self.error_kind = kind;
        self.error_message = message.into();
        self.last_attempt = Utc::now();
    }
}

/// Persisted record for an image, keyed by `i:<hash(normalized_url)>`.
/// Downloads may be deferred; the record exists for dedup and tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub status: ImageStatus,
    pub error_kind: ErrorKind,
    pub error_message: String,
    #[serde(with = "ts_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_millis_opt")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(with = "ts_millis")]
    pub last_attempt: DateTime<Utc>,
    pub attempt_count: u32,
    pub original_url: String,
    pub local_path: String,
    pub caption: String,
    pub file_size_bytes: u64,
    pub content_type: String,
}

impl ImageRecord {
    pub fn new(original_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: ImageStatus::Pending,
            error_kind: ErrorKind::None,
            error_message: String::new(),
            created_at: now,
            processed_at: None,
            last_attempt: now,
            attempt_count: 0,
            original_url: original_url.into(),
            local_path: String::new(),
            caption: String::new(),
            file_size_bytes: 0,
            content_type: String::new(),
        }
    }

    pub fn mark_success(&mut self, path: String, size: u64, content_type: String) {
        self.status = ImageStatus::Success;
        self.error_kind = ErrorKind::None;
        self.error_message.clear();
        self.processed_at = Some(Utc::now());
        self.local_path = path;
        self.file_size_bytes = size;
        self.content_type = content_type;
    }

    pub fn mark_skipped(&mut self, reason: ImageStatus) {
        self.status = reason;
        self.processed_at = Some(Utc::now());
    }
}

/// Outcome of a single HTTP fetch (possibly after retries).
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub status_code: u16,
    pub body: String,
    pub final_url: String,
    pub content_type: String,
    pub error: String,
    pub response_time_ms: u64,
    pub success: bool,
    pub is_redirect: bool,
}

impl FetchResult {
    pub fn is_html(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("text/html")
    }

    /// Retryable outcomes: transport failure (status 0), 429, and 5xx.
    pub fn is_retryable(&self) -> bool {
        self.status_code == 0 || self.status_code == 429 || (500..600).contains(&self.status_code)
    }
}

/// Result of running the content pipeline over one fetched page.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub title: String,
    pub markdown: String,
    pub extracted_links: Vec<String>,
    pub image_urls: Vec<String>,
    pub content_hash: String,
    pub token_count: u32,
    pub saved_file_path: String,
    pub success: bool,
    pub error: String,
    pub error_kind: ErrorKind,
}

/// Per-site outcome reported by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteResult {
    pub site_key: String,
    pub success: bool,
    pub error: String,
    pub pages_processed: u64,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_status_round_trip() {
        let statuses = [
            PageStatus::Unknown,
            PageStatus::Pending,
            PageStatus::InProgress,
            PageStatus::Success,
            PageStatus::Failure,
            PageStatus::NotFound,
            PageStatus::OutOfScope,
            PageStatus::RobotsDisallowed,
        ];
        for status in statuses {
            let json = serde_json::to_string(&status).unwrap();
            let back: PageStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
        assert_eq!(
            serde_json::to_string(&PageStatus::RobotsDisallowed).unwrap(),
            "\"robots_disallowed\""
        );
        assert_eq!(
            serde_json::to_string(&PageStatus::NotFound).unwrap(),
            "\"not_found\""
        );
    }

    #[test]
    fn test_error_kind_round_trip() {
        let kinds = [
            ErrorKind::None,
            ErrorKind::NetworkError,
            ErrorKind::TimeoutError,
            ErrorKind::HttpError,
            ErrorKind::ParseError,
            ErrorKind::SelectorNotFound,
            ErrorKind::ContentEmpty,
            ErrorKind::IoError,
            ErrorKind::RateLimited,
            ErrorKind::RobotsDisallowed,
            ErrorKind::OutOfScope,
            ErrorKind::MaxRetriesExceeded,
            ErrorKind::Unknown,
        ];
        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
        }
        assert_eq!(
            serde_json::to_string(&ErrorKind::MaxRetriesExceeded).unwrap(),
            "\"max_retries_exceeded\""
        );
    }

    #[test]
    fn test_page_record_round_trip() {
        let mut record = PageRecord::new("https://example.com/docs/", 2);
        record.mark_success("abc123".to_string(), "/out/docs.md".to_string(), 42);
        record.final_url = "https://example.com/docs/".to_string();
        record.attempt_count = 3;

        let json = serde_json::to_string(&record).unwrap();
        let back: PageRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.status, PageStatus::Success);
        assert_eq!(back.normalized_url, record.normalized_url);
        assert_eq!(back.content_hash, "abc123");
        assert_eq!(back.local_file_path, "/out/docs.md");
        assert_eq!(back.token_count, 42);
        assert_eq!(back.attempt_count, 3);
        assert_eq!(back.depth, 2);
        assert!(back.processed_at.is_some());
    }

    #[test]
    fn test_page_record_lifecycle() {
        let mut record = PageRecord::new("https://example.com/p", 1);
        assert_eq!(record.status, PageStatus::Pending);

        record.mark_in_progress();
        assert_eq!(record.status, PageStatus::InProgress);

        record.mark_failure(ErrorKind::NetworkError, "connection reset");
        assert_eq!(record.status, PageStatus::Failure);
        assert_eq!(record.error_kind, ErrorKind::NetworkError);
        assert_eq!(record.error_message, "connection reset");

        record.mark_success("h".into(), "/out/p.md".into(), 7);
        assert_eq!(record.status, PageStatus::Success);
        assert_eq!(record.error_kind, ErrorKind::None);
        assert!(record.error_message.is_empty());
    }

    #[test]
    fn test_image_record_round_trip() {
        let mut record = ImageRecord::new("https://example.com/logo.png");
        record.local_path = "/out/images/img_ff.bin".to_string();
        record.caption = "logo".to_string();
        record.mark_success(
            "/out/images/img_ff.bin".to_string(),
            1024,
            "image/png".to_string(),
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: ImageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_timestamp_format() {
        let record = PageRecord::new("https://example.com/", 0);
        let json = serde_json::to_string(&record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let created = value["created_at"].as_str().unwrap();
        assert!(created.ends_with('Z'));
        // YYYY-MM-DDTHH:MM:SS.mmmZ
        assert_eq!(created.len(), 24);
        assert_eq!(&created[10..11], "T");
        assert_eq!(&created[19..20], ".");
    }

    #[test]
    fn test_work_item_priority_defaults_to_depth() {
        let item = WorkItem::new("https://example.com/a", 3);
        assert_eq!(item.priority, 3);
        let boosted = WorkItem::with_priority("https://example.com/b", 3, 0);
        assert_eq!(boosted.priority, 0);
        assert_eq!(boosted.depth, 3);
    }

    #[test]
    fn test_fetch_result_retryable() {
        let mk = |code| FetchResult {
            status_code: code,
            ..Default::default()
        };
        assert!(mk(0).is_retryable());
        assert!(mk(429).is_retryable());
        assert!(mk(500).is_retryable());
        assert!(mk(503).is_retryable());
        assert!(!mk(200).is_retryable());
        assert!(!mk(404).is_retryable());
        assert!(!mk(301).is_retryable());
    }

    #[test]
    fn test_fetch_result_is_html() {
        let mut result = FetchResult {
            content_type: "text/html; charset=utf-8".to_string(),
            ..Default::default()
        };
        assert!(result.is_html());
        result.content_type = "application/json".to_string();
        assert!(!result.is_html());
    }
}
