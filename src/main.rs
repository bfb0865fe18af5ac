//! imgcache - command-line front end for the image cache
//!
//! Resolves, preloads and clears cached images in the local cache directory.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use imgcache::{CacheConfig, ImageCache, Resolution};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Resolve URLs to cached paths
    Get { urls: Vec<String> },
    /// Download URLs into the cache concurrently
    Preload { urls: Vec<String> },
    /// Print the display source for one URL
    Src { url: String },
    /// Empty the cache directory
    Clear,
    /// Drop one cached image
    ClearUrl { url: String },
    /// Print cache statistics
    Stats,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"imgcache - Disk cache for remote images

USAGE:
    imgcache get <url>...
    imgcache preload <url>...
    imgcache src <url>
    imgcache clear
    imgcache clear-url <url>
    imgcache stats
    imgcache help

COMMANDS:
    get        Resolve each URL to a cached file, downloading on a miss
    preload    Warm the cache for every URL
    src        Print the display source (file path or base64 data URL)
    clear      Remove every cached image
    clear-url  Remove the cached copy of one image
    stats      Print cache statistics as JSON
    help       Show this help message

EXAMPLES:
    imgcache get https://example.com/logo.png
    IMGCACHE_MAX_SIZE=52428800 imgcache preload https://a.example/1.jpg https://a.example/2.jpg

ENVIRONMENT:
    IMGCACHE_CONFIG       JSON configuration file
    IMGCACHE_MAX_SIZE     Maximum cache size in bytes (0 = unlimited)
    IMGCACHE_MAX_AGE      Maximum image age in seconds (0 = unlimited)
    IMGCACHE_CONCURRENCY  Simultaneous downloads
    IMGCACHE_DEBUG        Report cache failures as warnings
    IMGCACHE_DIR_NAME     Cache directory name
    RUST_LOG              Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let rest = args[2..].to_vec();
    match args[1].as_str() {
        "get" | "preload" => {
            if rest.is_empty() {
                return Err(anyhow!("Usage: imgcache {} <url>...", args[1]));
            }
            if args[1] == "get" {
                Ok(Command::Get { urls: rest })
            } else {
                Ok(Command::Preload { urls: rest })
            }
        }
        "src" | "clear-url" => {
            if rest.len() != 1 {
                return Err(anyhow!("Usage: imgcache {} <url>", args[1]));
            }
            let url = rest[0].clone();
            if args[1] == "src" {
                Ok(Command::Src { url })
            } else {
                Ok(Command::ClearUrl { url })
            }
        }
        "clear" => Ok(Command::Clear),
        "stats" => Ok(Command::Stats),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Configuration from `IMGCACHE_CONFIG` with environment overrides
fn load_config() -> Result<CacheConfig> {
    let config = match env::var("IMGCACHE_CONFIG") {
        Ok(path) => CacheConfig::from_file(&PathBuf::from(&path))
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => CacheConfig::default(),
    };
    Ok(config.apply_env()?)
}

fn print_resolution(resolution: Resolution) {
    let kind = if resolution.is_cached() { "cached" } else { "fallback" };
    println!("{} {}", kind, resolution.into_src());
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Initialize logging
    let default_level = if config.debug_mode {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default_level);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    let cache = ImageCache::from_config(config)?;
    info!(dir = %cache.cache_dir().display(), "Using image cache");

    match command {
        Command::Get { urls } => {
            for url in urls {
                print_resolution(cache.get_image_path(&url).await);
            }
        }
        Command::Preload { urls } => {
            let mut tasks = JoinSet::new();
            for url in urls {
                let cache = cache.clone();
                tasks.spawn(async move { cache.preload(&url).await });
            }
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(resolution) => print_resolution(resolution),
                    Err(e) => error!(error = %e, "Preload task failed"),
                }
            }
        }
        Command::Src { url } => {
            println!("{}", cache.get_image_src(&url).await);
        }
        Command::Clear => {
            cache.clear_cache().await?;
            println!("Cache cleared.");
        }
        Command::ClearUrl { url } => {
            if cache.clear_image_cache(&url).await? {
                println!("Removed {}", url);
            } else {
                println!("Not cached: {}", url);
            }
        }
        Command::Stats => {
            cache.init(false).await?;
            let stats = cache.stats().await;
            stats.log_metrics();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Help => print_help(),
    }

    cache.shutdown();
    Ok(())
}
