//! citemap - citation geography for one researcher
//!
//! Harvests every work citing the subject's publications, resolves each
//! citing author's institution and geocodes it. Prints a run summary and
//! writes one CSV row per (citing author, citing paper, cited paper).

use anyhow::{Context, Result};
use citemap::models::HarvestState;
use citemap::services::{
    write_citation_csv, CacheStore, GeocodeResolver, NominatimGeocoder, PipelineOptions,
    PipelineOrchestrator, RateLimiterConfig, RateLimiterHandle, ScholarClient, SourceClient,
    VariantPolicy,
};
use citemap::utils::RetryPolicy;
use citemap_common::config::{load_or_default, resolve_cache_folder};
use citemap_common::{AffiliationPolicy, TomlConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "citemap")]
#[command(about = "Map the institutions citing a researcher's publications")]
#[command(version)]
struct Args {
    /// Scholar profile identifier of the subject researcher
    identifier: String,

    /// TOML configuration file (falls back to CITEMAP_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder for harvest caches (overrides CITEMAP_CACHE_FOLDER and the config file)
    #[arg(long)]
    cache_folder: Option<PathBuf>,

    /// Ignore and do not write the harvest cache
    #[arg(long)]
    no_cache: bool,

    /// Affiliation resolution policy: aggressive or conservative
    #[arg(short, long)]
    policy: Option<AffiliationPolicy>,

    /// Concurrent harvest workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Route upstream requests through a proxy
    #[arg(long)]
    use_proxy: bool,

    /// Explicit proxy URL (implies --use-proxy)
    #[arg(long)]
    proxy_url: Option<String>,

    /// Output CSV path
    #[arg(short = 'o', long, default_value = "citation_info.csv")]
    csv_output: PathBuf,

    /// Log the resolved (author, affiliation) list
    #[arg(long)]
    print_affiliations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before the subscriber exists so its log level can apply
    let mut config =
        load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level);

    info!(
        "Starting citemap v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let cache = if args.no_cache || config.disable_cache {
        info!("Harvest cache disabled");
        CacheStore::disabled()
    } else {
        let folder = resolve_cache_folder(args.cache_folder.as_deref(), config.cache_folder.as_deref());
        info!("Cache folder: {}", folder.display());
        CacheStore::new(folder)
    };

    let limiter = RateLimiterHandle::spawn(RateLimiterConfig::from(&config.harvest));
    let source: Arc<dyn SourceClient> = Arc::new(
        ScholarClient::new(&config, limiter).context("Failed to build scholar client")?,
    );

    let geocoder =
        NominatimGeocoder::new(&config.geocode).context("Failed to build geocoding client")?;
    let geocode_retry = RetryPolicy {
        max_attempts: config.geocode.max_attempts,
        ..RetryPolicy::from(&config.retry)
    };
    let resolver = GeocodeResolver::new(geocoder, VariantPolicy::from(&config.geocode), geocode_retry);

    let mut options = PipelineOptions::from_config(&config);
    options.print_affiliations = args.print_affiliations;

    let mut orchestrator = PipelineOrchestrator::new(source, cache, resolver, options);

    let cancel_token = CancellationToken::new();
    let interrupt_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping harvest");
            interrupt_token.cancel();
        }
    });

    let report = orchestrator
        .run(&args.identifier, &cancel_token)
        .await
        .with_context(|| format!("Citation pipeline failed for '{}'", args.identifier))?;

    if report.final_state != HarvestState::Done {
        warn!(
            "Run ended in {:?}; writing harvested rows without affiliations or locations",
            report.final_state
        );
    }
    write_citation_csv(&args.csv_output, &report.records)
        .with_context(|| format!("Failed to write {}", args.csv_output.display()))?;

    println!("{}", report.summary);
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(configured_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(configured_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Command-line flags on top of the loaded configuration
fn apply_overrides(config: &mut TomlConfig, args: &Args) {
    if let Some(policy) = args.policy {
        config.affiliation_policy = policy;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if args.use_proxy {
        config.use_network_proxy = true;
    }
    if let Some(url) = &args.proxy_url {
        config.use_network_proxy = true;
        config.proxy_url = Some(url.clone());
    }
    if args.no_cache {
        config.disable_cache = true;
    }
}
