pub mod cli;
pub mod config;
pub mod crawler;
pub mod detector;
pub mod fetcher;
pub mod html;
pub mod logging;
pub mod markdown;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod rate_limiter;
pub mod robots;
pub mod sitemap;
pub mod store;
pub mod url_utils;
pub mod utils;

// Re-export main types for library usage
pub use config::{AppConfig, ConfigError, SiteConfig};
pub use crawler::{CrawlError, SiteCrawler};
pub use fetcher::Fetcher;
pub use models::{
    ErrorKind, FetchResult, ImageRecord, ImageStatus, PageRecord, PageStatus, ProcessResult,
    SiteResult, WorkItem,
};
pub use orchestrator::Orchestrator;
pub use queue::{PriorityQueue, QueueStats};
pub use rate_limiter::RateLimiter;
pub use robots::RobotsHandler;
pub use store::{MemoryStore, SledStore, StoreError, VisitedStore};
