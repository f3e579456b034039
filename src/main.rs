mod cli;
mod crawl;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// mimalloc keeps memory bounded under high fetch concurrency where glibc
// malloc tends not to release.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use siteaudit_core::AuditConfig;

use crate::cli::{Cli, Commands};
use crate::crawl::run_audit;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AuditConfig = toml::from_str(&config_str)?;

    // Environment overrides for the knobs people tune in CI.
    if let Ok(v) = std::env::var("SITEAUDIT_WORKERS") {
        if let Some(n) = v.parse::<usize>().ok().filter(|&n| n > 0 && n <= 128) {
            config.crawler.workers = n;
        }
    }
    if let Ok(v) = std::env::var("SITEAUDIT_MAX_DEPTH") {
        if let Ok(n) = v.parse::<i32>() {
            config.limits.max_depth = n;
        }
    }
    if let Ok(v) = std::env::var("SITEAUDIT_USER_AGENT") {
        if !v.trim().is_empty() {
            config.http.user_agent = v;
        }
    }

    match cli.command {
        Commands::Audit {
            seed,
            depth,
            workers,
            max_urls,
            max_req_per_sec,
            skip_analyzers,
            ignore_robots,
        } => {
            config.seed_url = seed;
            if let Some(depth) = depth {
                config.limits.max_depth = depth;
            }
            if let Some(workers) = workers {
                config.crawler.workers = workers;
            }
            if let Some(max_urls) = max_urls {
                config.limits.max_urls = max_urls;
            }
            if let Some(rps) = max_req_per_sec {
                config.crawler.max_req_per_sec = rps;
            }
            if let Some(filter) = skip_analyzers {
                config.analysis.analyzer_filter_regex = Some(filter);
            }
            if ignore_robots {
                config.http.respect_robots = false;
            }

            let outcome = run_audit(config).await?;
            print_summary(&outcome);
        }
        Commands::Analyzers => {
            use siteaudit_analyzers::Analyzer;
            let registry = siteaudit_analyzers::build_registry(&config)?;
            println!("{} analyzers registered:", registry.len());
            for analyzer in registry {
                println!("  {:>4}  {}", analyzer.order(), analyzer.name());
            }
        }
    }

    Ok(())
}

fn print_summary(outcome: &crawl::AuditOutcome) {
    println!(
        "\naudit finished in {:.1} s — {} URLs visited, {} tables",
        outcome.elapsed.as_secs_f64(),
        outcome.store.visited_count(),
        outcome.store.tables().len()
    );
    for item in outcome.store.summary_items() {
        println!("  [{:>8}] {}: {}", item.status.as_str(), item.code, item.message);
    }
}
