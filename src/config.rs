//! Application and per-site configuration, loaded from TOML.
//!
//! Duration-valued fields accept strings with `ms`, `s`, `m`, or `h`
//! suffixes; a bare number means seconds.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("unknown site key: {0}")]
    UnknownSite(String),
}

/// Parse a duration string: `250ms`, `5s`, `2m`, `1h`, or a bare number of
/// seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Duration::ZERO);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (value, unit) = trimmed.split_at(split);
    let number: f64 = value
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;

    let millis = match unit.trim() {
        "ms" => number,
        "" | "s" | "sec" => number * 1000.0,
        "m" | "min" => number * 60.0 * 1000.0,
        "h" | "hr" => number * 60.0 * 60.0 * 1000.0,
        other => return Err(ConfigError::InvalidDuration(other.to_string())),
    };

    Ok(Duration::from_millis(millis as u64))
}

fn de_duration<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    match Repr::deserialize(de)? {
        Repr::Number(secs) => Ok(Duration::from_millis((secs * 1000.0) as u64)),
        Repr::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

/// Settings applied to the shared HTTP client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientSettings {
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    #[serde(deserialize_with = "de_duration")]
    pub idle_conn_timeout: Duration,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            idle_conn_timeout: Duration::from_secs(90),
            user_agent: "DocCrawler/1.0 (+https://github.com/doc-crawler)".to_string(),
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// Configuration for one crawl target.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub start_urls: Vec<String>,
    pub allowed_domain: String,
    pub allowed_path_prefix: String,
    pub content_selector: String,
    /// 0 means unlimited.
    pub max_depth: u32,
    /// Zero means "inherit the global default".
    #[serde(deserialize_with = "de_duration")]
    pub delay_per_host: Duration,
    pub skip_images: bool,
    pub max_image_size_bytes: u64,
    /// Supports `*` and `*.suffix` entries; empty allows everything.
    pub allowed_image_domains: Vec<String>,
    pub disallowed_path_patterns: Vec<String>,
    pub respect_robots_txt: bool,
    pub respect_nofollow: bool,
    pub seed_from_sitemaps: bool,
    pub enable_output_mapping: Option<bool>,
    pub output_mapping_filename: Option<String>,
    #[serde(skip)]
    disallowed_path_regex: Vec<Regex>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            allowed_domain: String::new(),
            allowed_path_prefix: String::new(),
            content_selector: "auto".to_string(),
            max_depth: 0,
            delay_per_host: Duration::ZERO,
            skip_images: false,
            max_image_size_bytes: 10 * 1024 * 1024,
            allowed_image_domains: Vec::new(),
            disallowed_path_patterns: Vec::new(),
            respect_robots_txt: true,
            respect_nofollow: true,
            seed_from_sitemaps: false,
            enable_output_mapping: None,
            output_mapping_filename: None,
            disallowed_path_regex: Vec::new(),
        }
    }
}

impl SiteConfig {
    pub fn is_auto_selector(&self) -> bool {
        self.content_selector == "auto"
    }

    /// Compile `disallowed_path_patterns`; invalid patterns are logged and
    /// dropped.
    fn compile_patterns(&mut self) {
        self.disallowed_path_regex = self
            .disallowed_path_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("invalid disallowed_path_pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();
    }

    /// False when the path matches any disallowed pattern.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        !self
            .disallowed_path_regex
            .iter()
            .any(|re| re.is_match(path))
    }

    pub fn is_image_domain_allowed(&self, domain: &str) -> bool {
        if self.allowed_image_domains.is_empty() {
            return true;
        }
        self.allowed_image_domains.iter().any(|allowed| {
            if allowed == "*" {
                true
            } else if let Some(suffix) = allowed.strip_prefix('*') {
                domain.ends_with(suffix)
            } else {
                domain == allowed
            }
        })
    }

    fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.start_urls.is_empty() {
            errors.push("start_urls is required and must not be empty".to_string());
        }
        if self.allowed_domain.is_empty() {
            errors.push("allowed_domain is required".to_string());
        }
        for url in &self.start_urls {
            if !crate::url_utils::is_valid_http_url(url) {
                errors.push(format!("start_url '{}' is not a valid http(s) URL", url));
            } else if !crate::url_utils::in_scope(url, &self.allowed_domain, "") {
                warnings.push(format!(
                    "start_url '{}' does not match allowed_domain '{}'",
                    url, self.allowed_domain
                ));
            }
        }
        if self.delay_per_host > Duration::ZERO && self.delay_per_host < Duration::from_millis(100)
        {
            warnings.push(
                "delay_per_host under 100ms may be too aggressive for remote hosts".to_string(),
            );
        }

        (errors, warnings)
    }
}

/// Result of validating an [`AppConfig`].
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "de_duration")]
    pub default_delay_per_host: Duration,
    pub num_workers: usize,
    pub num_image_workers: usize,
    /// Upper bound on concurrent in-flight requests per site.
    pub max_requests: usize,
    pub max_requests_per_host: usize,
    pub output_base_dir: String,
    pub state_dir: String,
    pub max_retries: u32,
    #[serde(deserialize_with = "de_duration")]
    pub initial_retry_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_retry_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub semaphore_acquire_timeout: Duration,
    /// Zero means unlimited.
    #[serde(deserialize_with = "de_duration")]
    pub global_crawl_timeout: Duration,
    pub skip_images: bool,
    pub max_image_size_bytes: u64,
    pub enable_output_mapping: bool,
    pub output_mapping_filename: String,
    pub http_client: HttpClientSettings,
    pub sites: BTreeMap<String, SiteConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_delay_per_host: Duration::from_millis(500),
            num_workers: 8,
            num_image_workers: 4,
            max_requests: 100,
            max_requests_per_host: 10,
            output_base_dir: "./crawled_docs".to_string(),
            state_dir: "./crawler_state".to_string(),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            semaphore_acquire_timeout: Duration::from_secs(60),
            global_crawl_timeout: Duration::ZERO,
            skip_images: false,
            max_image_size_bytes: 10 * 1024 * 1024,
            enable_output_mapping: true,
            output_mapping_filename: "url_mapping.tsv".to_string(),
            http_client: HttpClientSettings::default(),
            sites: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(content)?;
        let default_delay = config.default_delay_per_host;
        for site in config.sites.values_mut() {
            if site.delay_per_host.is_zero() {
                site.delay_per_host = default_delay;
            }
            site.compile_patterns();
        }
        Ok(config)
    }

    pub fn site_keys(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    pub fn has_site(&self, key: &str) -> bool {
        self.sites.contains_key(key)
    }

    pub fn site(&self, key: &str) -> Result<&SiteConfig, ConfigError> {
        self.sites
            .get(key)
            .ok_or_else(|| ConfigError::UnknownSite(key.to_string()))
    }

    pub fn skip_images_for(&self, site: &SiteConfig) -> bool {
        self.skip_images || site.skip_images
    }

    pub fn output_mapping_enabled_for(&self, site: &SiteConfig) -> bool {
        site.enable_output_mapping.unwrap_or(self.enable_output_mapping)
    }

    pub fn output_mapping_filename_for(&self, site: &SiteConfig) -> String {
        site.output_mapping_filename
            .clone()
            .unwrap_or_else(|| self.output_mapping_filename.clone())
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.num_workers < 1 {
            report.errors.push("num_workers must be >= 1".to_string());
        }
        if self.max_requests < 1 {
            report.errors.push("max_requests must be >= 1".to_string());
        }
        if self.sites.is_empty() {
            report.warnings.push("no sites configured".to_string());
        }

        for (key, site) in &self.sites {
            let (errors, warnings) = site.validate();
            report
                .errors
                .extend(errors.into_iter().map(|e| format!("site '{}': {}", key, e)));
            report
                .warnings
                .extend(warnings.into_iter().map(|w| format!("site '{}': {}", key, w)));
        }

        report
    }
}
