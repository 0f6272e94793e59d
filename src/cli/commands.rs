use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

use crate::browser::driver::{BrowserDriver, ContextOptions};
use crate::browser::fingerprint::EvasionProfileProvider;
use crate::browser::webdriver::WebDriverBrowser;
use crate::cli::config::CrawlerConfig;
use crate::cli::CrawlArgs;
use crate::crawler::controller::CrawlerController;
use crate::crawler::task::{TaskReport, TaskSettings};
use crate::extract::StructureAnalyzer;
use crate::storage;

fn load_config(profile: Option<&str>) -> Result<CrawlerConfig> {
    match profile {
        Some(profile) => CrawlerConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile)),
        None => CrawlerConfig::load_default(),
    }
}

/// Task settings from the configured defaults and command line overrides
fn task_settings(config: &CrawlerConfig, args: &CrawlArgs) -> TaskSettings {
    let defaults = &config.task_defaults;
    TaskSettings {
        use_proxy: args.use_proxy || defaults.use_proxy,
        respect_robots: args.respect_robots.unwrap_or(defaults.respect_robots),
        delay_secs: args.delay.unwrap_or(defaults.delay_secs),
        max_retries: args.max_retries.unwrap_or(defaults.max_retries),
    }
}

/// Run one crawl task to completion, printing progress as it arrives
pub async fn crawl(args: CrawlArgs) -> Result<()> {
    let mut config = load_config(args.profile.as_deref())?;
    if let Some(max_concurrent) = args.max_concurrent {
        config.crawler.max_concurrent = max_concurrent;
    }
    let depth = args.depth.unwrap_or(config.crawler.max_depth);
    let settings = task_settings(&config, &args);

    let controller = CrawlerController::new(config).await?;

    // Subscribe before the task exists so its first events are not missed
    let mut events = controller.subscribe_all();
    let task_id = controller.create_task(&args.urls, depth, settings).await?;
    info!("Crawl task started with ID: {}", task_id);

    loop {
        match events.recv().await {
            Ok(event) if event.task_id == task_id => {
                println!(
                    "[{:>3}%] {:<9} {}",
                    event.progress, event.status, event.message
                );
                if event.status.is_terminal() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Progress output fell behind, skipped {} event(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }

    let report = controller.wait(&task_id).await?;
    print_summary(&report);

    let metrics = controller.metrics().await;
    println!(
        "Fetches: {} ok, {} failed, {} slow (mean {:.0}ms, max {}ms)",
        metrics.successful_fetches,
        metrics.failed_fetches,
        metrics.slow_fetches,
        metrics.mean_duration_ms(),
        metrics.max_duration_ms
    );

    if let Some(output) = &args.output {
        write_report(&report, output).await?;
        info!("Report written to: {}", output.display());
    }

    Ok(())
}

fn print_summary(report: &TaskReport) {
    println!("Task ID: {}", report.task_id);
    println!("Status: {}", report.status);
    println!("Pages Crawled: {}", report.stats.pages_crawled);
    println!("Elements Found: {}", report.stats.elements_found);
    println!(
        "Operations Submitted: {} ({} unique URLs)",
        report.operations_submitted,
        report.visited.len()
    );
    if let Some(site) = &report.site_structure {
        println!(
            "Seed Structure: {} links, {} forms, login required: {}",
            site.links.len(),
            site.forms.len(),
            site.login_required
        );
    }

    if !report.stats.errors.is_empty() {
        println!("Errors:");
        for error in &report.stats.errors {
            println!("  - {}: {}", error.url, error.message);
        }
    }
}

async fn write_report(report: &TaskReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .context(format!("Failed to write report: {}", path.display()))
}

/// Show the last stored status of a task
pub async fn status(task_id: String) -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    let store = storage::create(&config.storage).await?;

    let Some(record) = store.load(&task_id).await? else {
        if config.storage.backend == "memory" {
            warn!("The memory status store only knows tasks of the running process");
        }
        anyhow::bail!("Task {} not found", task_id);
    };

    println!("Task ID: {}", record.task_id);
    println!("Status: {}", record.status);
    println!("Progress: {}%", record.progress);
    println!("Pages Crawled: {}", record.pages_crawled);
    println!("Elements Found: {}", record.elements_found);
    println!("Errors: {}", record.error_count);
    println!("Created: {}", record.created_at);
    println!("Last Updated: {}", record.updated_at);

    Ok(())
}

/// Fetch one page and report its login signal and forms
pub async fn check_login(url: String) -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    let url = Url::parse(&url).context(format!("Invalid URL: {}", url))?;

    let profiles = EvasionProfileProvider::new(
        config.browser.fingerprints.clone(),
        config.browser.viewport,
    );
    let options = ContextOptions {
        profile: Arc::new(profiles.generate()),
        proxy: None,
    };
    let browser = WebDriverBrowser::new(config.browser.clone(), config.crawler.fetch_timeout());

    let mut session = browser.open(&options).await?;
    let snapshot = tokio::time::timeout(
        config.crawler.fetch_timeout(),
        session.navigate(&url, config.browser.wait_condition),
    )
    .await
    .context(format!("Timed out loading {}", url))?;
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
    let snapshot = snapshot?;

    let structure = StructureAnalyzer::new()?.analyze(&snapshot);

    println!("URL: {}", snapshot.url);
    println!("Login Required: {}", structure.login_required);
    println!("Links: {}", structure.links.len());
    for form in &structure.forms {
        let fields: Vec<String> = form
            .fields
            .iter()
            .map(|field| format!("{} ({})", field.name, field.field_type))
            .collect();
        println!(
            "Form: {} {} [{}]",
            form.method.to_uppercase(),
            form.action,
            fields.join(", ")
        );
    }

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = CrawlerConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from the defaults if it does not exist
pub fn manage_profile(profile_name: String) -> Result<()> {
    match CrawlerConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        }
        Err(_) => {
            warn!(
                "Profile '{}' does not exist. Creating a default profile.",
                profile_name
            );
            CrawlerConfig::default().save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = CrawlerConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
