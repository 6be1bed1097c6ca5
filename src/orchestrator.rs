//! Runs N sites in parallel, one driver task per site. Each driver owns its
//! own store, fetcher, rate limiter, and crawler; sites share no
//! crawl-scoped state, so one site failing leaves the others running.

use crate::config::AppConfig;
use crate::crawler::SiteCrawler;
use crate::fetcher::Fetcher;
use crate::models::SiteResult;
use crate::rate_limiter::RateLimiter;
use crate::store::{SledStore, VisitedStore};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

pub struct Orchestrator {
    app_config: AppConfig,
    site_keys: Vec<String>,
    resume: bool,
}

impl Orchestrator {
    pub fn new(app_config: AppConfig, site_keys: Vec<String>, resume: bool) -> Self {
        Self {
            app_config,
            site_keys,
            resume,
        }
    }

    /// Drive every site to completion and collect per-site results, in the
    /// order the site keys were given.
    pub async fn run(&self) -> Vec<SiteResult> {
        let mut tasks = JoinSet::new();

        for site_key in self.site_keys.clone() {
            let app_config = self.app_config.clone();
            let resume = self.resume;

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = run_site(&app_config, &site_key, resume).await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(pages_processed) => SiteResult {
                        site_key,
                        success: true,
                        error: String::new(),
                        pages_processed,
                        duration_ms,
                    },
                    Err(error) => SiteResult {
                        site_key,
                        success: false,
                        error,
                        pages_processed: 0,
                        duration_ms,
                    },
                }
            });
        }

        let mut results = Vec::with_capacity(self.site_keys.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("site driver task failed: {}", e),
            }
        }

        results.sort_by_key(|r| {
            self.site_keys
                .iter()
                .position(|k| *k == r.site_key)
                .unwrap_or(usize::MAX)
        });
        results
    }
}

async fn run_site(app_config: &AppConfig, site_key: &str, resume: bool) -> Result<u64, String> {
    let site_config = app_config.site(site_key).map_err(|e| e.to_string())?.clone();

    let store: Arc<dyn VisitedStore> = Arc::new(
        SledStore::open(&app_config.state_dir, &site_config.allowed_domain, resume)
            .map_err(|e| e.to_string())?,
    );
    let fetcher = Arc::new(Fetcher::new(app_config).map_err(|e| e.to_string())?);
    let rate_limiter = Arc::new(RateLimiter::new(site_config.delay_per_host));

    let crawler = Arc::new(
        SiteCrawler::new(
            app_config.clone(),
            site_config,
            site_key,
            store,
            fetcher,
            rate_limiter,
            resume,
        )
        .map_err(|e| e.to_string())?,
    );

    crawler.run().await.map_err(|e| e.to_string())?;
    Ok(crawler.pages_processed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn single_page_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body><main>Hello</main></body></html>", "text/html"),
            )
            .mount(&server)
            .await;
        server
    }

    fn config_for(server: &MockServer, out: &TempDir, state: &TempDir) -> AppConfig {
        let toml = format!(
            r#"
            num_workers = 2
            max_retries = 0
            default_delay_per_host = "1ms"
            output_base_dir = "{out}"
            state_dir = "{state}"

            [sites.docs]
            start_urls = ["{uri}/docs"]
            allowed_domain = "127.0.0.1"
            content_selector = "main"
            respect_robots_txt = false
            "#,
            out = out.path().display(),
            state = state.path().display(),
            uri = server.uri(),
        );
        AppConfig::load_from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn test_orchestrator_runs_site_to_completion() {
        let server = single_page_server().await;
        let out = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = config_for(&server, &out, &state);

        let orchestrator = Orchestrator::new(config, vec!["docs".to_string()], false);
        let results = orchestrator.run().await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success, "error: {}", results[0].error);
        assert_eq!(results[0].site_key, "docs");
        assert_eq!(results[0].pages_processed, 1);
    }

    #[tokio::test]
    async fn test_unknown_site_fails_without_stopping_others() {
        let server = single_page_server().await;
        let out = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config = config_for(&server, &out, &state);

        let orchestrator = Orchestrator::new(
            config,
            vec!["docs".to_string(), "missing".to_string()],
            false,
        );
        let results = orchestrator.run().await;

        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.site_key == "docs").unwrap();
        let failed = results.iter().find(|r| r.site_key == "missing").unwrap();
        assert!(ok.success);
        assert!(!failed.success);
        assert!(failed.error.contains("missing"));
    }
}
