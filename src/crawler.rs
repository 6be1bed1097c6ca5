//! The crawl engine for a single site: a worker pool popping from the
//! priority queue, claiming URLs against the visited store, pacing requests
//! through the rate limiter, fetching with retry, running the content
//! pipeline, and enqueueing discovered in-scope links. A monitor loop closes
//! the queue once it is empty and no worker has work in flight.

use crate::config::{AppConfig, SiteConfig};
use crate::fetcher::Fetcher;
use crate::html::HtmlDocument;
use crate::models::{ErrorKind, PageRecord, PageStatus, WorkItem};
use crate::pipeline::ContentProcessor;
use crate::queue::{PriorityQueue, QueueStats};
use crate::rate_limiter::RateLimiter;
use crate::robots::RobotsHandler;
use crate::sitemap;
use crate::store::{StoreError, VisitedStore};
use crate::url_utils;
use crate::utils::escape_tsv;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

const WORKER_POP_TIMEOUT: Duration = Duration::from_millis(200);
const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SiteCrawler {
    app_config: AppConfig,
    site_config: SiteConfig,
    site_key: String,
    site_output_dir: String,
    skip_images: bool,
    resume: bool,

    store: Arc<dyn VisitedStore>,
    fetcher: Arc<Fetcher>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<PriorityQueue>,
    processor: ContentProcessor,

    robots_cache: DashMap<String, Arc<RobotsHandler>>,
    request_permits: Arc<Semaphore>,
    mapping_file: Mutex<Option<std::fs::File>>,

    shutdown_flag: AtomicBool,
    in_flight: AtomicI64,
    pages_processed: AtomicU64,
    fatal_error: Mutex<Option<StoreError>>,
}

impl SiteCrawler {
    pub fn new(
        app_config: AppConfig,
        site_config: SiteConfig,
        site_key: impl Into<String>,
        store: Arc<dyn VisitedStore>,
        fetcher: Arc<Fetcher>,
        rate_limiter: Arc<RateLimiter>,
        resume: bool,
    ) -> Result<Self, CrawlError> {
        let site_output_dir = format!(
            "{}/{}",
            app_config.output_base_dir.trim_end_matches('/'),
            site_config.allowed_domain
        );
        std::fs::create_dir_all(&site_output_dir)?;

        let mapping_file = if app_config.output_mapping_enabled_for(&site_config) {
            let path = format!(
                "{}/{}",
                site_output_dir,
                app_config.output_mapping_filename_for(&site_config)
            );
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(resume)
                .write(true)
                .truncate(!resume)
                .open(path)?;
            Some(file)
        } else {
            None
        };

        let skip_images = app_config.skip_images_for(&site_config);
        let processor = ContentProcessor::new(store.clone(), app_config.output_base_dir.clone());
        let request_permits = Arc::new(Semaphore::new(app_config.max_requests.max(1)));

        Ok(Self {
            app_config,
            site_config,
            site_key: site_key.into(),
            site_output_dir,
            skip_images,
            resume,
            store,
            fetcher,
            rate_limiter,
            queue: Arc::new(PriorityQueue::new()),
            processor,
            robots_cache: DashMap::new(),
            request_permits,
            mapping_file: Mutex::new(mapping_file),
            shutdown_flag: AtomicBool::new(false),
            in_flight: AtomicI64::new(0),
            pages_processed: AtomicU64::new(0),
            fatal_error: Mutex::new(None),
        })
    }

    pub fn pages_processed(&self) -> u64 {
        self.pages_processed.load(Ordering::Relaxed)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn site_output_dir(&self) -> &str {
        &self.site_output_dir
    }

    /// Run the crawl to quiescence: seed, spawn workers, monitor, join,
    /// close the store.
    pub async fn run(self: &Arc<Self>) -> Result<(), CrawlError> {
        if self.resume {
            let queue = Arc::clone(&self.queue);
            let requeued = self.store.requeue_incomplete(&mut |mut item| {
                // Requeued records already hold a claim; carrying the
                // normalized form marks the item as pre-claimed.
                item.normalized_url = Some(item.url.clone());
                queue.push(item);
            })?;
            tracing::info!(site = %self.site_key, requeued, "requeued incomplete pages");
        }

        self.seed_queue();
        if self.site_config.seed_from_sitemaps {
            self.seed_from_sitemaps().await;
        }

        let worker_count = self.app_config.num_workers.max(1);
        tracing::info!(
            site = %self.site_key,
            workers = worker_count,
            queued = self.queue.size(),
            "crawl started"
        );

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let crawler = Arc::clone(self);
            workers.push(tokio::spawn(async move { crawler.worker_loop().await }));
        }

        let started = Instant::now();
        let deadline = self.app_config.global_crawl_timeout;
        // Quiescence needs two consecutive idle observations: a worker that
        // has popped an item but not yet bumped in_flight would otherwise
        // slip through the snapshot.
        let mut idle_polls = 0u32;
        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }
            if self.queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0 {
                idle_polls += 1;
                if idle_polls >= 2 {
                    self.queue.close();
                    break;
                }
            } else {
                idle_polls = 0;
            }
            if !deadline.is_zero() && started.elapsed() >= deadline {
                tracing::warn!(site = %self.site_key, "global crawl timeout reached");
                self.queue.close();
                break;
            }
            tokio::time::sleep(MONITOR_POLL_INTERVAL).await;
        }

        for worker in workers {
            let _ = worker.await;
        }

        if let Some(file) = self.mapping_file.lock().as_mut() {
            let _ = file.flush();
        }
        self.store.close()?;

        if let Some(error) = self.fatal_error.lock().take() {
            return Err(error.into());
        }

        tracing::info!(
            site = %self.site_key,
            pages = self.pages_processed(),
            "crawl finished"
        );
        Ok(())
    }

    /// Idempotent: raise the shutdown flag and wake everyone.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.queue.close();
    }

    fn seed_queue(&self) {
        for url in &self.site_config.start_urls {
            if !url_utils::in_scope(
                url,
                &self.site_config.allowed_domain,
                &self.site_config.allowed_path_prefix,
            ) {
                tracing::warn!(site = %self.site_key, url = %url, "seed URL out of scope, skipped");
                continue;
            }
            self.queue.push(WorkItem::new(url.clone(), 0));
        }
    }

    /// Seed from sitemaps advertised by the origin's robots.txt. Index
    /// documents are followed one level deep.
    async fn seed_from_sitemaps(&self) {
        let Some(seed) = self.site_config.start_urls.first() else {
            return;
        };
        let robots = self.robots_for(seed).await;

        for sitemap_url in robots.get_sitemaps() {
            let result = self.fetcher.fetch_once(&sitemap_url).await;
            if !result.success {
                continue;
            }
            match sitemap::detect_type(&result.body) {
                sitemap::SitemapType::UrlSet => {
                    self.enqueue_sitemap_urls(&result.body);
                }
                sitemap::SitemapType::Index => {
                    for child in sitemap::parse_index(&result.body) {
                        let child_result = self.fetcher.fetch_once(&child.loc).await;
                        if child_result.success {
                            self.enqueue_sitemap_urls(&child_result.body);
                        }
                    }
                }
                sitemap::SitemapType::Unknown => {}
            }
        }
    }

    fn enqueue_sitemap_urls(&self, xml: &str) {
        let mut items = Vec::new();
        for entry in sitemap::parse_urlset(xml) {
            if url_utils::in_scope(
                &entry.loc,
                &self.site_config.allowed_domain,
                &self.site_config.allowed_path_prefix,
            ) {
                items.push(WorkItem::new(entry.loc, 0));
            }
        }
        if !items.is_empty() {
            tracing::debug!(site = %self.site_key, count = items.len(), "seeded from sitemap");
            self.queue.push_batch(items);
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            if self.shutdown_flag.load(Ordering::SeqCst)
                && self.queue.is_closed()
                && self.queue.is_empty()
            {
                break;
            }

            match self.queue.try_pop(WORKER_POP_TIMEOUT).await {
                Some(item) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    let outcome = self.process_page(item).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);

                    if let Err(error) = outcome {
                        tracing::error!(site = %self.site_key, %error, "store failure, aborting site");
                        let mut fatal = self.fatal_error.lock();
                        if fatal.is_none() {
                            *fatal = Some(error);
                        }
                        drop(fatal);
                        self.shutdown();
                        break;
                    }
                }
                None => {
                    if self.queue.is_closed() && self.queue.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    async fn process_page(&self, item: WorkItem) -> Result<(), StoreError> {
        if self.site_config.max_depth > 0 && item.depth > self.site_config.max_depth {
            return Ok(());
        }

        let pre_claimed = item.normalized_url.is_some();
        let normalized = item
            .normalized_url
            .clone()
            .unwrap_or_else(|| url_utils::normalize(&item.url));

        if !self.store.mark_page_visited(&normalized)? && !pre_claimed {
            return Ok(());
        }

        if self.site_config.respect_robots_txt {
            let robots = self.robots_for(&item.url).await;
            let path = url_utils::extract_path(&item.url);
            if !robots.is_allowed(&path, &self.app_config.http_client.user_agent) {
                let mut record = PageRecord::new(&normalized, item.depth);
                record.mark_failure(ErrorKind::RobotsDisallowed, "disallowed by robots.txt");
                record.status = PageStatus::RobotsDisallowed;
                self.store.update_page_status(&normalized, &record)?;
                tracing::debug!(url = %item.url, "robots disallowed");
                return Ok(());
            }
        }

        let host = url_utils::extract_domain(&item.url);
        if !host.is_empty() {
            self.rate_limiter.wait_for_host(&host).await;
        }

        let permit = match tokio::time::timeout(
            self.app_config.semaphore_acquire_timeout,
            Arc::clone(&self.request_permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                let mut record = PageRecord::new(&normalized, item.depth);
                record.mark_failure(
                    ErrorKind::RateLimited,
                    "timed out waiting for a request permit",
                );
                self.store.update_page_status(&normalized, &record)?;
                return Ok(());
            }
        };

        let (result, attempts) = self.fetcher.fetch_with_retry(&item.url).await;
        drop(permit);

        let mut record = PageRecord::new(&normalized, item.depth);
        record.attempt_count = attempts;
        record.final_url = result.final_url.clone();

        if !result.success {
            let message = if result.error.is_empty() {
                format!("HTTP status {}", result.status_code)
            } else {
                result.error.clone()
            };
            let kind = classify_fetch_error(result.status_code, &message, result.is_retryable());
            record.mark_failure(kind, message);
            if result.status_code == 404 {
                record.status = PageStatus::NotFound;
            }
            self.store.update_page_status(&normalized, &record)?;
            tracing::debug!(url = %item.url, status = result.status_code, "fetch failed");
            return Ok(());
        }

        if !result.is_html() {
            // Binary assets are recorded but never processed.
            record.mark_success(String::new(), String::new(), 0);
            self.store.update_page_status(&normalized, &record)?;
            return Ok(());
        }

        let doc = HtmlDocument::parse(&result.body);
        let processed =
            self.processor
                .process(&doc, &result.final_url, &self.site_config, self.skip_images);

        if processed.success {
            record.mark_success(
                processed.content_hash.clone(),
                processed.saved_file_path.clone(),
                processed.token_count,
            );
            self.store.update_page_status(&normalized, &record)?;
            self.pages_processed.fetch_add(1, Ordering::Relaxed);
            self.append_mapping(&item.url, &processed.saved_file_path);
        } else {
            record.mark_failure(processed.error_kind, processed.error.clone());
            self.store.update_page_status(&normalized, &record)?;
        }

        // Discovered links go back onto the queue at depth + 1; parse
        // failures, scope rejects, and disallowed paths drop silently.
        for link in &processed.extracted_links {
            let Some(absolute) = url_utils::resolve(&item.url, link) else {
                continue;
            };
            if !self
                .site_config
                .is_path_allowed(&url_utils::extract_path(&absolute))
            {
                continue;
            }
            if !url_utils::in_scope(
                &absolute,
                &self.site_config.allowed_domain,
                &self.site_config.allowed_path_prefix,
            ) {
                continue;
            }
            self.queue
                .push(WorkItem::new(absolute, item.depth + 1).with_referrer(item.url.clone()));
        }

        Ok(())
    }

    /// robots.txt for the URL's host, fetched once per host and cached. A
    /// robots `Crawl-delay` longer than the configured spacing widens the
    /// rate limit for that host.
    async fn robots_for(&self, url: &str) -> Arc<RobotsHandler> {
        let host = url_utils::extract_domain(url);
        if let Some(cached) = self.robots_cache.get(&host) {
            return cached.value().clone();
        }

        let handler = match url_utils::extract_origin(url) {
            Some(origin) => {
                let result = self.fetcher.fetch_once(&format!("{}/robots.txt", origin)).await;
                if result.success {
                    RobotsHandler::parse(&result.body)
                } else {
                    RobotsHandler::default()
                }
            }
            None => RobotsHandler::default(),
        };

        if let Some(delay_secs) = handler.crawl_delay(&self.app_config.http_client.user_agent) {
            let robots_delay = Duration::from_secs(delay_secs);
            if robots_delay > self.rate_limiter.host_delay(&host) {
                self.rate_limiter.set_host_delay(&host, robots_delay);
            }
        }

        let handler = Arc::new(handler);
        self.robots_cache.insert(host, Arc::clone(&handler));
        handler
    }

    fn append_mapping(&self, url: &str, file_path: &str) {
        let mut guard = self.mapping_file.lock();
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{}\t{}", escape_tsv(url), escape_tsv(file_path)) {
                tracing::warn!("failed to append url mapping: {}", e);
            }
        }
    }
}

fn classify_fetch_error(status_code: u16, message: &str, retryable: bool) -> ErrorKind {
    if status_code == 0 {
        if message.contains("timeout") {
            ErrorKind::TimeoutError
        } else {
            ErrorKind::NetworkError
        }
    } else if retryable {
        ErrorKind::MaxRetriesExceeded
    } else {
        ErrorKind::HttpError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PageStore};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_app_config(output_dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.output_base_dir = output_dir.path().to_str().unwrap().to_string();
        config.num_workers = 2;
        config.max_retries = 0;
        config.default_delay_per_host = Duration::from_millis(1);
        config.http_client.timeout = Duration::from_secs(5);
        config
    }

    fn test_site(server_uri: &str, domain: &str) -> SiteConfig {
        let toml = format!(
            r#"
            start_urls = ["{}/docs"]
            allowed_domain = "{}"
            content_selector = "main"
            respect_robots_txt = false
            "#,
            server_uri, domain
        );
        toml::from_str(&toml).unwrap()
    }

    fn build_crawler(
        app: AppConfig,
        site: SiteConfig,
        store: Arc<dyn VisitedStore>,
        resume: bool,
    ) -> Arc<SiteCrawler> {
        let fetcher = Arc::new(Fetcher::new(&app).unwrap());
        let delay = site.delay_per_host;
        let limiter = Arc::new(RateLimiter::new(delay));
        Arc::new(
            SiteCrawler::new(app, site, "test", store, fetcher, limiter, resume).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_seed_queue_enforces_scope() {
        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let mut site = test_site("https://docs.ex.com", "docs.ex.com");
        site.start_urls = vec![
            "https://docs.ex.com/docs".to_string(),
            "https://evil.com/docs".to_string(),
        ];

        let crawler = build_crawler(app, site, Arc::new(MemoryStore::new()), false);
        crawler.seed_queue();
        assert_eq!(crawler.queue.size(), 1);
    }

    #[tokio::test]
    async fn test_depth_bound_drops_item() {
        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let mut site = test_site("https://docs.ex.com", "docs.ex.com");
        site.max_depth = 1;

        let store = Arc::new(MemoryStore::new());
        let crawler = build_crawler(app, site, store.clone(), false);
        crawler
            .process_page(WorkItem::new("https://docs.ex.com/deep", 2))
            .await
            .unwrap();

        // Nothing was claimed: the item was dropped before any store work.
        assert_eq!(
            store
                .check_page_status(&url_utils::normalize("https://docs.ex.com/deep"))
                .unwrap()
                .0,
            PageStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_duplicate_claim_skips_processing() {
        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let site = test_site("http://127.0.0.1:1", "127.0.0.1");

        let store = Arc::new(MemoryStore::new());
        let normalized = url_utils::normalize("http://127.0.0.1:1/docs");
        store.mark_page_visited(&normalized).unwrap();

        let crawler = build_crawler(app, site, store.clone(), false);
        // No server is running; if the claim were won this would record a
        // failure. The existing claim makes it a no-op instead.
        crawler
            .process_page(WorkItem::new("http://127.0.0.1:1/docs", 0))
            .await
            .unwrap();

        let (status, _) = store.check_page_status(&normalized).unwrap();
        assert_eq!(status, PageStatus::Pending);
    }

    #[tokio::test]
    async fn test_robots_disallowed_recorded_without_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
            )
            .mount(&server)
            .await;
        // No mock for /private/x: a fetch attempt would 404 via wiremock's
        // default and record NotFound instead of RobotsDisallowed.

        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let mut site = test_site(&server.uri(), "127.0.0.1");
        site.respect_robots_txt = true;

        let store = Arc::new(MemoryStore::new());
        let crawler = build_crawler(app, site, store.clone(), false);

        let url = format!("{}/private/x", server.uri());
        crawler.process_page(WorkItem::new(url.clone(), 0)).await.unwrap();

        let (status, record) = store
            .check_page_status(&url_utils::normalize(&url))
            .unwrap();
        assert_eq!(status, PageStatus::RobotsDisallowed);
        assert_eq!(record.unwrap().error_kind, ErrorKind::RobotsDisallowed);
    }

    #[tokio::test]
    async fn test_404_records_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let site = test_site(&server.uri(), "127.0.0.1");

        let store = Arc::new(MemoryStore::new());
        let crawler = build_crawler(app, site, store.clone(), false);

        let url = format!("{}/missing", server.uri());
        crawler.process_page(WorkItem::new(url.clone(), 0)).await.unwrap();

        let (status, record) = store
            .check_page_status(&url_utils::normalize(&url))
            .unwrap();
        assert_eq!(status, PageStatus::NotFound);
        let record = record.unwrap();
        assert_eq!(record.error_kind, ErrorKind::HttpError);
        assert_eq!(record.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_non_html_recorded_success_without_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .insert_header("content-type", "application/json"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let site = test_site(&server.uri(), "127.0.0.1");

        let store = Arc::new(MemoryStore::new());
        let crawler = build_crawler(app, site, store.clone(), false);

        let url = format!("{}/data.json", server.uri());
        crawler.process_page(WorkItem::new(url.clone(), 0)).await.unwrap();

        let (status, record) = store
            .check_page_status(&url_utils::normalize(&url))
            .unwrap();
        assert_eq!(status, PageStatus::Success);
        let record = record.unwrap();
        assert!(record.local_file_path.is_empty());
        assert_eq!(crawler.pages_processed(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let app = test_app_config(&dir);
        let site = test_site("https://docs.ex.com", "docs.ex.com");
        let crawler = build_crawler(app, site, Arc::new(MemoryStore::new()), false);

        crawler.shutdown();
        crawler.shutdown();
        assert!(crawler.queue.is_closed());
    }
}
