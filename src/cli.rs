use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "siteaudit", about = "Site auditing crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a site and print the audit summary
    Audit {
        /// Seed URL to start from
        seed: String,

        /// Maximum crawl depth (0 = seed only, -1 = unlimited)
        #[arg(short, long)]
        depth: Option<i32>,

        /// Number of concurrent fetch workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Hard cap on reserved URLs
        #[arg(long)]
        max_urls: Option<usize>,

        /// Global requests-per-second cap (0 = unlimited)
        #[arg(long)]
        max_req_per_sec: Option<u32>,

        /// Exclude analyzers whose name matches this regex
        #[arg(long)]
        skip_analyzers: Option<String>,

        /// Ignore robots.txt
        #[arg(long)]
        ignore_robots: bool,
    },
    /// List the analyzer registry with finalize order
    Analyzers,
}
