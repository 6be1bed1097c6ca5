//! Retrying HTTP fetcher. One pooled client per fetcher; a single attempt
//! produces a [`FetchResult`] and the retry wrapper layers exponential
//! backoff over retryable outcomes (transport failure, 429, 5xx).

use crate::config::AppConfig;
use crate::models::FetchResult;
use rand::Rng;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

pub struct Fetcher {
    client: Client,
    follow_redirects: bool,
    max_retries: u32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl Fetcher {
    pub fn new(config: &AppConfig) -> Result<Self, FetchError> {
        let settings = &config.http_client;
        let redirect_policy = if settings.follow_redirects {
            Policy::limited(settings.max_redirects)
        } else {
            Policy::none()
        };

        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_idle_conns_per_host)
            .pool_idle_timeout(settings.idle_conn_timeout)
            .redirect(redirect_policy)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            follow_redirects: settings.follow_redirects,
            max_retries: config.max_retries,
            initial_retry_delay: config.initial_retry_delay,
            max_retry_delay: config.max_retry_delay,
        })
    }

    /// Issue a single GET. Transport errors and timeouts yield status 0
    /// with a descriptive message instead of an `Err`.
    pub async fn fetch_once(&self, url: &str) -> FetchResult {
        let mut result = FetchResult {
            final_url: url.to_string(),
            ..Default::default()
        };

        let start = Instant::now();
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                result.response_time_ms = start.elapsed().as_millis() as u64;
                result.error = describe_error(&e);
                return result;
            }
        };

        result.status_code = response.status().as_u16();
        result.success = response.status().is_success();
        result.final_url = response.url().to_string();
        result.content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        // With redirects disabled, surface the Location target so callers
        // can decide what to do with 3xx responses.
        if !self.follow_redirects && (300..400).contains(&result.status_code) {
            if let Some(location) = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                result.is_redirect = true;
                result.final_url = location.to_string();
            }
        }

        match response.text().await {
            Ok(body) => result.body = body,
            Err(e) => {
                result.success = false;
                result.error = format!("failed to read response body: {}", e);
            }
        }
        result.response_time_ms = start.elapsed().as_millis() as u64;

        if !result.success && result.error.is_empty() {
            result.error = format!("HTTP status {}", result.status_code);
        }

        result
    }

    /// Fetch with up to `max_retries` additional attempts, sleeping an
    /// exponentially growing jittered delay between retryable failures.
    /// Returns the last attempt's result and the number of attempts made.
    pub async fn fetch_with_retry(&self, url: &str) -> (FetchResult, u32) {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 1;

        loop {
            let result = self.fetch_once(url).await;

            if result.success || !result.is_retryable() || attempt >= max_attempts {
                return (result, attempt);
            }

            let delay = self.backoff_delay(attempt);
            tracing::debug!(
                url,
                attempt,
                status = result.status_code,
                delay_ms = delay.as_millis() as u64,
                "retrying fetch"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// `min(initial * 2^(attempt-1), max)` with ±10% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_retry_delay
            .as_millis()
            .saturating_mul(1u128 << (attempt - 1).min(20)) as u64;
        let capped = base.min(self.max_retry_delay.as_millis() as u64);

        let spread = (capped / 10) as i64;
        if spread == 0 {
            return Duration::from_millis(capped);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((capped as i64 + offset) as u64)
    }
}

fn describe_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "request timeout".to_string();
    }
    if error.is_connect() {
        let message = error.to_string().to_ascii_lowercase();
        if message.contains("connection refused") {
            return "connection refused".to_string();
        }
        if message.contains("dns") || message.contains("no such host") {
            return "dns resolution failed".to_string();
        }
        return format!("connection error: {}", error);
    }
    format!("network error: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.max_retries = 2;
        config.initial_retry_delay = Duration::from_millis(10);
        config.max_retry_delay = Duration::from_millis(50);
        config.http_client.timeout = Duration::from_secs(5);
        config
    }

    #[tokio::test]
    async fn test_fetch_once_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html>hi</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let result = fetcher.fetch_once(&format!("{}/page", server.uri())).await;

        assert!(result.success);
        assert_eq!(result.status_code, 200);
        assert_eq!(result.body, "<html>hi</html>");
        assert!(result.is_html());
        assert!(result.error.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_once_transport_error() {
        // Nothing listens on this port.
        let fetcher = Fetcher::new(&test_config()).unwrap();
        let result = fetcher.fetch_once("http://127.0.0.1:9/page").await;

        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert!(!result.error.is_empty());
        assert!(result.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_once_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let result = fetcher.fetch_once(&format!("{}/gone", server.uri())).await;

        assert!(!result.success);
        assert_eq!(result.status_code, 404);
        assert!(!result.is_retryable());
    }

    #[tokio::test]
    async fn test_redirect_location_captured_when_not_following() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "https://ex.com/new"),
            )
            .mount(&server)
            .await;

        let mut config = test_config();
        config.http_client.follow_redirects = false;
        let fetcher = Fetcher::new(&config).unwrap();
        let result = fetcher.fetch_once(&format!("{}/old", server.uri())).await;

        assert!(result.is_redirect);
        assert_eq!(result.final_url, "https://ex.com/new");
        assert_eq!(result.status_code, 301);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let server = MockServer::start().await;
        // Two 500s, then a 200.
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ok")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let (result, attempts) = fetcher
            .fetch_with_retry(&format!("{}/flaky", server.uri()))
            .await;

        assert!(result.success);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_bound_respected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let (result, attempts) = fetcher
            .fetch_with_retry(&format!("{}/down", server.uri()))
            .await;

        assert!(!result.success);
        assert_eq!(result.status_code, 503);
        // max_retries = 2 means at most 3 attempts.
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&test_config()).unwrap();
        let (result, attempts) = fetcher
            .fetch_with_retry(&format!("{}/forbidden", server.uri()))
            .await;

        assert_eq!(result.status_code, 403);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut config = test_config();
        config.initial_retry_delay = Duration::from_millis(100);
        config.max_retry_delay = Duration::from_millis(400);
        let fetcher = Fetcher::new(&config).unwrap();

        let d1 = fetcher.backoff_delay(1).as_millis() as u64;
        let d2 = fetcher.backoff_delay(2).as_millis() as u64;
        let d4 = fetcher.backoff_delay(4).as_millis() as u64;

        assert!((90..=110).contains(&d1));
        assert!((180..=220).contains(&d2));
        // 100 * 2^3 = 800, capped at 400 (±10%).
        assert!((360..=440).contains(&d4));
    }
}
