//! Skill Observatory main entry point
//!
//! This is the command-line interface for the Skill Observatory crawler.

use clap::Parser;
use skill_observatory::config::{load_config_with_hash, Config};
use skill_observatory::crawler::{crawl, select_registries};
use skill_observatory::CrawlMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Skill Observatory: incremental registry crawler
///
/// Skill Observatory discovers and downloads skills from the configured
/// registries, tracks content changes in a shared store and records every
/// run in a ledger.
#[derive(Parser, Debug)]
#[command(name = "skill-observatory")]
#[command(version)]
#[command(about = "Incremental crawler for skill registries", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Registry to run (repeatable; default: all configured registries)
    #[arg(long = "registry", value_name = "ID")]
    registries: Vec<String>,

    /// Override the crawl mode of every selected registry
    #[arg(long, value_parser = parse_mode)]
    mode: Option<CrawlMode>,

    /// Override the number of download workers of every selected registry
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    workers: Option<u16>,

    /// Download items that were registered but never fetched
    #[arg(long, conflicts_with_all = ["stats", "dry_run"])]
    resume: bool,

    /// Show catalog and run statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Validate config and show what would run without crawling
    #[arg(long)]
    dry_run: bool,

    /// Database URL, overriding `store.url`
    #[arg(long, env = "OBSERVATORY_DATABASE_URL")]
    database_url: Option<String>,

    /// Database credential, overriding `store.auth-token`
    #[arg(long, env = "OBSERVATORY_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn parse_mode(s: &str) -> Result<CrawlMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    apply_overrides(&mut config, &cli);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &cli.registries)?;
    } else if cli.stats {
        handle_stats(&config, &cli.registries)?;
    } else {
        let all_succeeded = handle_crawl(&config, &cli.registries, cli.resume).await?;
        if !all_succeeded {
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("skill_observatory=info,warn"),
            1 => EnvFilter::new("skill_observatory=debug,info"),
            2 => EnvFilter::new("skill_observatory=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Applies command-line overrides on top of the file configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.store.url = url.clone();
    }
    if let Some(token) = &cli.auth_token {
        config.store.auth_token = token.clone();
    }

    if let Some(mode) = cli.mode {
        config.crawler.mode = mode;
        for entry in &mut config.registries {
            entry.mode = Some(mode);
        }
    }
    if let Some(workers) = cli.workers {
        config.crawler.workers = usize::from(workers);
        for entry in &mut config.registries {
            entry.workers = Some(usize::from(workers));
        }
    }
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config, registries: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let selected = select_registries(config, registries)?;

    println!("=== Skill Observatory Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Rate limit: {}ms", config.crawler.rate_limit_ms);
    println!("  Mode: {}", config.crawler.mode);
    println!("  Commit every: {} items", config.crawler.commit_every);
    println!(
        "  Mark missing deleted: {}",
        config.crawler.mark_missing_deleted
    );

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nStore:");
    println!("  URL: {}", config.store.url);
    println!(
        "  Retries: {} attempts, {}ms base delay",
        config.store.max_attempts, config.store.base_delay_ms
    );

    println!("\nOutput:");
    println!("  Content: {}", config.output.content_dir);
    println!("  Manifests: {}", config.output.manifest_dir);

    println!("\nRegistries ({}):", selected.len());
    for entry in &selected {
        println!(
            "  - {} ({}, {} workers)",
            entry.id,
            entry.mode.unwrap_or(config.crawler.mode),
            entry.workers.unwrap_or(config.crawler.workers)
        );
        println!("    index: {}", entry.index_url);
        if let Some(template) = &entry.content_url_template {
            println!("    content: {}", template);
        }
        if let Some(shard) = &entry.shard {
            println!("    shard: {}", shard);
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} registries", selected.len());

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config, registries: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    use skill_observatory::output::{load_statistics, print_statistics};
    use skill_observatory::Store;

    println!("Database: {}\n", config.store.url);

    let ids: Vec<String> = select_registries(config, registries)?
        .into_iter()
        .map(|entry| entry.id.clone())
        .collect();

    // Open the database
    let mut store = Store::from_config(&config.store)?;

    // Load statistics
    let stats = load_statistics(&mut store, &ids, 10)?;

    // Print statistics
    print_statistics(&stats);

    store.close()?;
    Ok(())
}

/// Handles the main crawl operation
///
/// Returns whether every registry run completed.
async fn handle_crawl(
    config: &Config,
    registries: &[String],
    resume: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    if resume {
        tracing::info!("Resuming pending downloads");
    } else {
        tracing::info!("Starting crawl");
    }

    let reports = crawl(config, registries, resume).await?;

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.is_failed())
        .map(|r| r.registry.as_str())
        .collect();

    println!("{}", serde_json::to_string_pretty(&reports)?);

    if failed.is_empty() {
        tracing::info!("All {} registry runs completed", reports.len());
        Ok(true)
    } else {
        tracing::error!("Failed registry runs: {}", failed.join(", "));
        Ok(false)
    }
}
