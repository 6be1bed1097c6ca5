use clap::{Parser, Subcommand};

/// doc_crawler cli
#[derive(Parser)]
#[command(name = "doc_crawler")]
#[command(about = "A polite, resumable documentation crawler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a fresh crawl
    Crawl {
        /// config file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// single site key from config
        #[arg(short, long, conflicts_with_all = ["sites", "all_sites"])]
        site: Option<String>,

        /// comma-separated site keys
        #[arg(long, value_delimiter = ',', conflicts_with = "all_sites")]
        sites: Option<Vec<String>>,

        /// crawl every configured site
        #[arg(long)]
        all_sites: bool,

        /// log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        loglevel: String,
    },

    /// Resume an interrupted crawl
    Resume {
        /// config file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// site key from config
        #[arg(short, long)]
        site: String,

        /// log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        loglevel: String,
    },

    /// Validate the configuration file without crawling
    Validate {
        /// config file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// List configured sites
    ListSites {
        /// config file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show version information
    Version,
}
