use clap::Parser;
use doc_crawler::cli::{Cli, Commands};
use doc_crawler::config::AppConfig;
use doc_crawler::logging::init_logging;
use doc_crawler::orchestrator::Orchestrator;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            config,
            site,
            sites,
            all_sites,
            loglevel,
        } => {
            if let Err(e) = init_logging("logs", &loglevel) {
                eprintln!("failed to initialize logging: {}", e);
                return ExitCode::FAILURE;
            }
            let app_config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };

            let site_keys = if all_sites {
                app_config.site_keys()
            } else if let Some(sites) = sites {
                sites
            } else if let Some(site) = site {
                vec![site]
            } else {
                eprintln!("error: --site, --sites, or --all-sites required");
                return ExitCode::FAILURE;
            };

            for key in &site_keys {
                if !app_config.has_site(key) {
                    eprintln!("error: unknown site key '{}'", key);
                    return ExitCode::FAILURE;
                }
            }

            run_crawl(app_config, site_keys, false).await
        }

        Commands::Resume {
            config,
            site,
            loglevel,
        } => {
            if let Err(e) = init_logging("logs", &loglevel) {
                eprintln!("failed to initialize logging: {}", e);
                return ExitCode::FAILURE;
            }
            let app_config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            if !app_config.has_site(&site) {
                eprintln!("error: unknown site key '{}'", site);
                return ExitCode::FAILURE;
            }

            run_crawl(app_config, vec![site], true).await
        }

        Commands::Validate { config } => {
            let app_config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            let report = app_config.validate();
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            if report.is_valid() {
                println!(
                    "configuration valid: {} site(s), {} warning(s)",
                    app_config.sites.len(),
                    report.warnings.len()
                );
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }

        Commands::ListSites { config } => {
            let app_config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            for (key, site) in &app_config.sites {
                println!(
                    "{}: {} ({} seed(s), prefix '{}')",
                    key,
                    site.allowed_domain,
                    site.start_urls.len(),
                    site.allowed_path_prefix
                );
            }
            ExitCode::SUCCESS
        }

        Commands::Version => {
            println!("doc_crawler {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
    }
}

fn load_config(path: &str) -> Result<AppConfig, ExitCode> {
    AppConfig::load_from_file(path).map_err(|e| {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    })
}

async fn run_crawl(app_config: AppConfig, site_keys: Vec<String>, resume: bool) -> ExitCode {
    let report = app_config.validate();
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.is_valid() {
        for error in &report.errors {
            eprintln!("error: {}", error);
        }
        return ExitCode::FAILURE;
    }

    let orchestrator = Orchestrator::new(app_config, site_keys, resume);
    let results = orchestrator.run().await;

    for result in &results {
        if result.success {
            println!(
                "[OK] {}: {} pages ({} ms)",
                result.site_key, result.pages_processed, result.duration_ms
            );
        } else {
            eprintln!("[FAIL] {}: {}", result.site_key, result.error);
        }
    }

    ExitCode::SUCCESS
}
