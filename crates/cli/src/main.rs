use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tagscope_api::{demo_inventory, ClientConfig, HttpApi, InventoryApi, MockApi};
use tagscope_core::selection::search_fields;
use tagscope_core::{SortSpec, Tag};
use tagscope_store::{spawn_controller, ControllerConfig, FetchOutcome};
use tracing::{info, warn};

mod render;

#[derive(Parser, Debug)]
#[command(name = "tagscopectl", version, about = "Browse and filter cloud inventory")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Inventory API base URL
    #[arg(long = "api-url", global = true, env = "TAGSCOPE_API_URL")]
    api_url: Option<String>,

    /// Serve a built-in demo inventory instead of talking to a backend
    #[arg(long = "mock", global = true, action = ArgAction::SetTrue)]
    mock: bool,

    /// Resources per page
    #[arg(long = "page-size", global = true, env = "TAGSCOPE_PAGE_SIZE")]
    page_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List filterable fields and their value counts
    Fields {
        /// Only fields whose name contains this text (case-insensitive)
        #[arg(long = "search")]
        search: Option<String>,
    },
    /// Query resources, optionally filtered by key=value tags
    Resources {
        /// Filter criterion, repeatable: same key ORs, different keys AND
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<Tag>,
        /// Sort key, e.g. "region" or "-region" for descending
        #[arg(long = "sort", value_parser = parse_sort, allow_hyphen_values = true)]
        sort: Option<SortSpec>,
        /// Number of pages to load
        #[arg(long = "pages", default_value_t = 1)]
        pages: usize,
        /// Keep paging until the results are exhausted
        #[arg(long = "all", action = ArgAction::SetTrue)]
        all: bool,
    },
    /// Show one resource with its tags and properties
    Show {
        id: String,
    },
    /// Ask the backend to re-ingest inventory and wait for it to finish
    Refresh,
    /// Current engine status
    Status,
    /// Inventory statistics
    Stats,
    /// Backend build information
    Info,
}

fn parse_tag(s: &str) -> Result<Tag, String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok(Tag::new(k.trim(), v.trim())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

fn parse_sort(s: &str) -> Result<SortSpec, String> {
    SortSpec::from_str(s).map_err(|e| e.to_string())
}

fn init_tracing() {
    let env = std::env::var("TAGSCOPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TAGSCOPE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TAGSCOPE_METRICS_ADDR; expected host:port");
        }
    }
}

fn build_api(cli: &Cli) -> Result<Arc<dyn InventoryApi>> {
    let mut cfg = ClientConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        cfg.base_url = ClientConfig::new(url)?.base_url;
    }
    if cli.mock {
        info!("using built-in demo inventory");
        return Ok(Arc::new(MockApi::new(demo_inventory())));
    }
    let http = HttpApi::new(&cfg)?;
    info!(url = %http.base_url(), "using inventory backend");
    Ok(Arc::new(http))
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let api = build_api(&cli)?;

    let mut ctl_cfg = ControllerConfig::from_env();
    if let Some(n) = cli.page_size.filter(|n| *n > 0) {
        ctl_cfg.page_size = n;
    }

    match &cli.command {
        Commands::Fields { search } => {
            let mut groups = api.fields().await.context("loading fields")?;
            if let Some(term) = search {
                groups = search_fields(&groups, term);
            }
            match cli.output {
                Output::Human => render::fields(&groups),
                Output::Json => print_json(&groups)?,
            }
        }
        Commands::Resources { tags, sort, pages, all } => {
            info!(tags = tags.len(), sort = ?sort.as_ref().map(|s| s.encode()), pages, all, "resources invoked");
            let h = spawn_controller(Arc::clone(&api), ctl_cfg);
            h.apply_filter(tags.clone(), sort.clone()).await.context("fetching resources")?;
            let mut loaded = 1usize;
            while *all || loaded < *pages {
                match h.fetch_next_page().await {
                    Ok(FetchOutcome::Appended { .. }) => loaded += 1,
                    Ok(FetchOutcome::Exhausted) | Ok(FetchOutcome::Skipped) => break,
                    Ok(other) => {
                        warn!(outcome = ?other, "unexpected next-page outcome");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "next page failed; showing what was loaded");
                        break;
                    }
                }
            }
            let snap = h.view().current();
            match cli.output {
                Output::Human => render::resources(&snap.cache.resources, snap.cache.count),
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Listing<'a> {
                        count: u64,
                        resources: &'a [tagscope_core::Resource],
                    }
                    print_json(&Listing { count: snap.cache.count, resources: &snap.cache.resources })?;
                }
            }
        }
        Commands::Show { id } => {
            let r = api.resource(id).await.with_context(|| format!("resource {}", id))?;
            match cli.output {
                Output::Human => render::resource(&r),
                Output::Json => print_json(&r)?,
            }
        }
        Commands::Refresh => {
            let h = spawn_controller(Arc::clone(&api), ctl_cfg);
            let status = h.refresh().await.map_err(|e| anyhow!("refresh failed: {}", e))?;
            match cli.output {
                Output::Human => render::engine(&status),
                Output::Json => print_json(&status)?,
            }
        }
        Commands::Status => {
            let status = api.engine_status().await?;
            match cli.output {
                Output::Human => render::engine(&status),
                Output::Json => print_json(&status)?,
            }
        }
        Commands::Stats => {
            let stats = api.stats().await?;
            match cli.output {
                Output::Human => println!("resources: {}", stats.resources_count),
                Output::Json => print_json(&stats)?,
            }
        }
        Commands::Info => {
            let info = api.info().await?;
            match cli.output {
                Output::Human => {
                    println!("version:    {}", info.version);
                    println!("git commit: {}", info.git_commit.as_deref().unwrap_or("-"));
                    println!("build time: {}", info.build_time.as_deref().unwrap_or("-"));
                }
                Output::Json => print_json(&info)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_args() {
        assert_eq!(parse_tag("region=us-east-1"), Ok(Tag::new("region", "us-east-1")));
        assert_eq!(parse_tag("env=(null)"), Ok(Tag::new("env", "(null)")));
        assert!(parse_tag("region").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn cli_parses_resources() {
        let cli = Cli::try_parse_from([
            "tagscopectl", "--mock", "resources", "--tag", "type=s3.Bucket", "--tag", "region=eu-west-1", "--sort", "-region",
        ])
        .unwrap();
        assert!(cli.mock);
        match cli.command {
            Commands::Resources { tags, sort, pages, all } => {
                assert_eq!(tags.len(), 2);
                assert_eq!(sort, Some(SortSpec::desc("region")));
                assert_eq!(pages, 1);
                assert!(!all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
