pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from one or more seed URLs and stream progress
    Crawl(CrawlArgs),

    /// Show the last known status of a task
    Status {
        /// Task ID to check status for
        #[arg(required = true)]
        task_id: String,
    },

    /// Check whether a page asks for a login
    CheckLogin {
        #[arg(required = true)]
        url: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Options of the `crawl` command; unset values come from the configuration
#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    /// Seed URLs, crawled in the given order
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Levels of links to follow below the seeds
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Site profile to use instead of the default configuration
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Route fetches through the configured proxies
    #[arg(long)]
    pub use_proxy: bool,

    /// Honour robots.txt for discovered links
    #[arg(long)]
    pub respect_robots: Option<bool>,

    /// Seconds to wait between attempts on the same URL
    #[arg(long)]
    pub delay: Option<f64>,

    /// Extra attempts after a failed fetch
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Cap on concurrently running fetches
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Write the final report as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl(args) => {
            info!("Starting crawl of {} seed(s)", args.urls.len());
            commands::crawl(args).await
        }
        Commands::Status { task_id } => {
            info!("Checking status for task {}", task_id);
            commands::status(task_id).await
        }
        Commands::CheckLogin { url } => {
            info!("Checking {} for a login form", url);
            commands::check_login(url).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}
