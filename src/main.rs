use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedmix::cache::CacheStore;
use feedmix::feed::FeedFetcher;
use feedmix::output::{self, Format};
use feedmix::server::{self, AppState};
use feedmix::{Config, FeedRequest, Mixer, SqliteCache};

/// Get the config directory path (~/.config/feedmix/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmix"))
}

#[derive(Parser, Debug)]
#[command(name = "feedmix", about = "Mix several Atom/RSS feeds into one")]
struct Args {
    /// Config file (default: ~/.config/feedmix/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mix feeds once and print the document to stdout
    Mix {
        /// Feed URL (repeat for each feed)
        #[arg(short = 'f', long = "feed", value_name = "URL", required = true)]
        feeds: Vec<String>,

        /// Entries kept per feed (0 or negative = all)
        #[arg(short = 'n', long, default_value_t = 0, allow_negative_numbers = true)]
        limit: i64,

        /// Prefer full entry content over summaries
        #[arg(long)]
        full: bool,

        /// Output format: atom, rss or json
        #[arg(long, default_value = "atom")]
        format: Format,
    },

    /// Serve /atom, /rss and /json over HTTP
    Serve {
        /// Listen address (overrides the config file)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Delete cache records older than the given age
    Prune {
        /// Age in seconds (overrides the config file)
        #[arg(long, value_name = "SECS")]
        older_than: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let cache_path = config.cache_path_in(&config_dir);
    if let Some(parent) = cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let cache_path_str = cache_path
        .to_str()
        .context("Cache path contains invalid UTF-8")?;
    let cache = SqliteCache::open(cache_path_str)
        .await
        .with_context(|| format!("Failed to open cache at {}", cache_path.display()))?;

    match args.command {
        Command::Prune { older_than } => {
            let older_than = older_than
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.prune_older_than());
            let deleted = cache
                .prune(older_than)
                .await
                .context("Failed to prune cache")?;
            println!("Pruned {} cache record(s)", deleted);
        }
        Command::Mix {
            feeds,
            limit,
            full,
            format,
        } => {
            let mixer = build_mixer(cache, &config)?;
            let limit = usize::try_from(limit).unwrap_or(0);
            let requests = FeedRequest::batch(feeds, limit, full);

            let mixed = mixer.mix(&requests, config.cache_ttl()).await;
            let document = output::render(&mixed, format, "feedmix:mix")?;
            println!("{document}");

            for error in &mixed.errors {
                eprintln!("warning: {}: {}", error.url, error.message);
            }
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            let mixer = build_mixer(cache, &config)?;
            server::run_server(&bind, AppState::new(mixer, config.cache_ttl()))
                .await
                .with_context(|| format!("Server on {bind} failed"))?;
        }
    }

    Ok(())
}

fn build_mixer(cache: SqliteCache, config: &Config) -> Result<Mixer> {
    let fetcher = FeedFetcher::new(config.fetch_timeout(), &config.user_agent)
        .context("Failed to build HTTP client")?;
    Ok(Mixer::from_config(
        Arc::new(cache),
        Arc::new(fetcher),
        config,
    ))
}
