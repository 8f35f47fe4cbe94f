//! Command line entry points.
//!
//! `podsieve serve` runs the HTTP republisher; `podsieve filter` applies a
//! filter to a single feed once and writes the result, for trying rules out
//! before putting them in the server config.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use podsieve::config::Config;
use podsieve::feed::{filter, transform, FeedDocument, FilterRule};
use podsieve::fetch::{CacheStore, Fetcher};
use podsieve::metrics::Metrics;
use podsieve::server::{router, FeedService};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often idle rate limit buckets are swept, and how long a bucket may
/// sit idle before it is dropped.
const BUCKET_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "podsieve", version, about = "Keyword-filtering RSS republisher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "podsieve.toml")]
        config: PathBuf,

        /// Override the configured listen host.
        #[arg(long)]
        host: Option<String>,

        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Filter a single feed once and write the result.
    Filter {
        /// Feed URL (http/https) or local file path.
        source: String,

        /// Keywords an item must carry to be kept (comma separated).
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,

        /// Keywords that remove an item (comma separated).
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Regex over the raw keywords text, instead of keyword lists.
        #[arg(long, conflicts_with_all = ["include", "exclude"])]
        regex: Option<String>,

        /// Output file; stdout when omitted.
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podsieve=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, host, port } => serve(config, host, port).await,
        Command::Filter {
            source,
            include,
            exclude,
            regex,
            output,
        } => run_filter(&source, &include, &exclude, regex.as_deref(), output).await,
    }
}

async fn serve(config_path: PathBuf, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(&config_path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if config.feeds.is_empty() {
        tracing::warn!("no feeds configured, every /feeds request will return 404");
    }

    let service = Arc::new(FeedService::new(&config).context("Failed to build feed service")?);

    // Sweep idle rate limit buckets so the per-client table cannot grow
    // without bound.
    let sweeper = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BUCKET_SWEEP_INTERVAL);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            let removed = sweeper.prune_rate_buckets(BUCKET_SWEEP_INTERVAL);
            if removed > 0 {
                tracing::debug!(removed, "pruned idle rate limit buckets");
            }
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, feeds = config.feeds.len(), "listening");

    axum::serve(
        listener,
        router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "failed to install shutdown handler");
            // Without a handler we cannot see the signal; keep serving.
            std::future::pending::<()>().await;
        }
    }
}

async fn run_filter(
    source: &str,
    include: &[String],
    exclude: &[String],
    regex: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let rule = build_rule(include, exclude, regex)?;
    let mut document = load_document(source).await?;

    if let Some(rule) = &rule {
        let removed = filter::apply(&mut document, rule);
        tracing::info!(removed, remaining = document.item_count(), "applied filter");
    }
    transform::mark_filtered(&mut document, source, transform::DEFAULT_DISCLOSURE_TEMPLATE);

    let xml = document.to_xml();
    match output {
        Some(path) => std::fs::write(&path, xml.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout()
            .write_all(xml.as_bytes())
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

/// Build the filter rule from CLI flags. No flags at all means an
/// attribution-only pass: the feed is rewritten with the disclosure and
/// generator but no items are removed.
fn build_rule(
    include: &[String],
    exclude: &[String],
    regex: Option<&str>,
) -> Result<Option<FilterRule>> {
    if let Some(pattern) = regex {
        let rule = FilterRule::regex(pattern).context("Invalid --regex pattern")?;
        return Ok(Some(rule));
    }
    if include.is_empty() && exclude.is_empty() {
        return Ok(None);
    }
    let rule = FilterRule::keywords(include, exclude).context("Invalid keyword lists")?;
    Ok(Some(rule))
}

async fn load_document(source: &str) -> Result<FeedDocument> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let defaults = Config::default();
        let fetcher = Fetcher::new(
            Arc::new(CacheStore::new(1)),
            Arc::new(Metrics::default()),
            defaults.request_timeout(),
            defaults.max_payload_bytes(),
        );
        let outcome = fetcher
            .fetch(source, Duration::ZERO, &defaults.default_user_agent())
            .await
            .with_context(|| format!("Failed to fetch {source}"))?;
        Ok(FeedDocument::clone(&outcome.document))
    } else {
        let bytes =
            std::fs::read(source).with_context(|| format!("Failed to read {source}"))?;
        FeedDocument::parse(&bytes).with_context(|| format!("Failed to parse feed from {source}"))
    }
}
