//! Metron CLI
//!
//! Command-line entry point: runs the API server with the collection
//! scheduler, or executes one-off collection/analysis/export commands
//! against the configured store.

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use metron::analytics::{ConfidenceLevel, ForecastModel, Forecaster, TrendAnalyzer};
use metron::api::{self, ApiConfig, AppState};
use metron::cache::MetricCache;
use metron::catalog::MetricCatalog;
use metron::config::{generate_default_config, Config};
use metron::engine::{CalculationEngine, SqliteDataSource};
use metron::events::{EventBus, EventPublisher, LogPublisher, WebhookPublisher};
use metron::model::DimensionSet;
use metron::scheduler::{CollectRequest, CollectionScheduler, Collector, SchedulerSettings};
use metron::store::{MetricStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "metron", version, about = "Business metrics engine")]
struct Cli {
    /// Path to a config file (defaults to the standard locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server with the collection scheduler
    Serve,

    /// Collect one metric now
    Collect {
        /// Metric code
        code: String,
        /// Dimension values as key=value pairs
        #[arg(short, long = "dimension")]
        dimensions: Vec<String>,
    },

    /// Fit a trend over a metric's recent history
    Trend {
        code: String,
        /// History window in days
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Forecast a metric's next values
    Forecast {
        code: String,
        /// Steps to project forward
        #[arg(long, default_value_t = 7)]
        horizon: usize,
        /// Model: linear_regression, moving_average or exponential_smoothing
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Export a metric's snapshot series as CSV
    Export {
        code: String,
        /// Output file ("-" for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,
        #[arg(long, default_value_t = 90)]
        days: i64,
    },

    /// Write a commented default config file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },

    /// Register a starter set of metrics in an empty store
    Seed,
}

/// Everything the commands need, wired per the config
struct Runtime {
    store: Arc<SqliteStore>,
    catalog: Arc<MetricCatalog>,
    scheduler: Arc<CollectionScheduler>,
    cache: Arc<MetricCache>,
    bus: Arc<EventBus>,
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };

    init_logging(&config);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Collect { code, dimensions } => collect(config, &code, &dimensions).await,
        Command::Trend { code, days } => trend(config, &code, days).await,
        Command::Forecast {
            code,
            horizon,
            model,
            days,
        } => forecast(config, &code, horizon, model.as_deref(), days).await,
        Command::Export { code, output, days } => export(config, &code, &output, days).await,
        Command::InitConfig { output } => init_config(&output),
        Command::Seed => seed(config).await,
    }
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("metron={}", config.logging.level)),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let store_path = PathBuf::from(&config.store.path);
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating store directory {:?}", parent))?;
    }
    let store = Arc::new(
        SqliteStore::open(&store_path)
            .with_context(|| format!("opening store at {:?}", store_path))?,
    );
    let source = Arc::new(
        SqliteDataSource::open(Path::new(&config.source.path))
            .with_context(|| format!("opening data source at {}", config.source.path))?,
    );

    let cache = Arc::new(MetricCache::new(Duration::from_secs(
        config.cache.default_ttl_secs,
    )));
    let bus = Arc::new(EventBus::default());
    let publisher = build_publisher(&config);

    let engine = Arc::new(CalculationEngine::new(store.clone(), source));
    let catalog = Arc::new(MetricCatalog::new(store.clone(), cache.clone()));
    let collector = Arc::new(Collector::new(
        store.clone(),
        engine,
        cache.clone(),
        publisher.clone(),
    ));

    let settings = SchedulerSettings {
        sweep_enabled: config.scheduler.anomaly_sweep_enabled,
        sweep_interval: Duration::from_secs(config.scheduler.anomaly_sweep_interval_hours * 3600),
        sweep_confidence: parse_confidence(&config.scheduler.anomaly_sweep_confidence),
    };
    let scheduler = Arc::new(CollectionScheduler::new(
        store.clone(),
        collector,
        bus.clone(),
        publisher,
        settings,
    ));

    Ok(Runtime {
        store,
        catalog,
        scheduler,
        cache,
        bus,
        config,
    })
}

fn build_publisher(config: &Config) -> Arc<dyn EventPublisher> {
    match (config.events.publisher.as_str(), &config.events.webhook_url) {
        ("webhook", Some(url)) => Arc::new(WebhookPublisher::new(
            url.clone(),
            Duration::from_secs(config.events.webhook_timeout_secs),
        )),
        ("webhook", None) => {
            tracing::warn!("webhook publisher selected without webhook_url, falling back to log");
            Arc::new(LogPublisher::new())
        }
        _ => Arc::new(LogPublisher::new()),
    }
}

fn parse_confidence(s: &str) -> ConfidenceLevel {
    match s {
        "low" => ConfidenceLevel::Low,
        "high" => ConfidenceLevel::High,
        _ => ConfidenceLevel::Medium,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("metron v{}", env!("CARGO_PKG_VERSION"));
    let runtime = build_runtime(config)?;

    if runtime.config.scheduler.enabled {
        let registered = runtime
            .scheduler
            .start()
            .await
            .context("starting the collection scheduler")?;
        tracing::info!(registered, "scheduled collection enabled");
    } else {
        tracing::info!("scheduled collection disabled by config");
    }

    let api_config = ApiConfig {
        host: runtime.config.api.host.clone(),
        port: runtime.config.api.port,
        max_body_size: runtime.config.api.max_body_size,
    };
    let state = AppState::new(
        runtime.store.clone(),
        runtime.catalog.clone(),
        runtime.scheduler.clone(),
        runtime.cache.clone(),
        runtime.bus.clone(),
        api_config.clone(),
    );

    api::serve(state, &api_config).await?;
    runtime.scheduler.stop().await;
    Ok(())
}

async fn collect(config: Config, code: &str, dimensions: &[String]) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let dims = parse_dimensions(dimensions)?;

    let outcome = runtime
        .scheduler
        .collect_by_code(code, CollectRequest::new().dimensions(dims))
        .await?;

    let snapshot = &outcome.snapshot;
    if snapshot.is_success() {
        println!(
            "{} [{} .. {}] = {}{}",
            code,
            snapshot.period.start,
            snapshot.period.end,
            snapshot.formatted_value.as_deref().unwrap_or(""),
            if outcome.computed { "" } else { " (already collected)" },
        );
    } else {
        anyhow::bail!(
            "collection failed: {}",
            snapshot.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn trend(config: Config, code: &str, days: i64) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let values = history(&runtime, code, days).await?;

    let result = TrendAnalyzer::new().analyze(&values);
    println!(
        "{}: {} (slope {:.4}, intensity {:.2}%, confidence {:.2}, n={})",
        code, result.direction, result.slope, result.intensity, result.confidence,
        result.sample_size,
    );
    println!(
        "next value: {:.2} [{:.2} .. {:.2}]",
        result.next_value, result.interval_lower, result.interval_upper
    );
    Ok(())
}

async fn forecast(
    config: Config,
    code: &str,
    horizon: usize,
    model: Option<&str>,
    days: i64,
) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let values = history(&runtime, code, days).await?;

    let model = match model {
        Some("linear_regression") => Some(ForecastModel::LinearRegression),
        Some("moving_average") => Some(ForecastModel::MovingAverage),
        Some("exponential_smoothing") => Some(ForecastModel::ExponentialSmoothing),
        Some(other) => anyhow::bail!("unknown forecast model '{}'", other),
        None => None,
    };

    let series = Forecaster::new().forecast(&values, horizon, ConfidenceLevel::Medium, model);
    println!(
        "{}: model {}, goodness {:.2}, n={}",
        code, series.model, series.goodness, series.sample_size
    );
    for point in &series.points {
        println!(
            "  +{}: {:.2} [{:.2} .. {:.2}]",
            point.step, point.value, point.lower, point.upper
        );
    }
    Ok(())
}

async fn export(config: Config, code: &str, output: &str, days: i64) -> anyhow::Result<()> {
    let runtime = build_runtime(config)?;
    let definition = runtime.catalog.require(code).await?;

    let to = Utc::now();
    let from = to - ChronoDuration::days(days);
    let snapshots = runtime
        .store
        .snapshot_series(definition.id, from, to, None)
        .await?;

    let writer: Box<dyn std::io::Write> = if output == "-" {
        Box::new(std::io::stdout())
    } else {
        Box::new(std::fs::File::create(output).with_context(|| format!("creating {}", output))?)
    };

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([
        "period_start",
        "period_end",
        "value",
        "formatted_value",
        "status",
        "dimension_hash",
        "collected_at",
    ])?;
    for snapshot in &snapshots {
        csv.write_record([
            snapshot.period.start.to_rfc3339(),
            snapshot.period.end.to_rfc3339(),
            snapshot.value.map(|v| v.to_string()).unwrap_or_default(),
            snapshot.formatted_value.clone().unwrap_or_default(),
            snapshot.status.as_str().to_string(),
            snapshot.dimension_hash.clone(),
            snapshot.collected_at.to_rfc3339(),
        ])?;
    }
    csv.flush()?;

    tracing::info!(count = snapshots.len(), metric = code, "series exported");
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{:?} already exists, not overwriting", output);
    }
    std::fs::write(output, generate_default_config())
        .with_context(|| format!("writing {:?}", output))?;
    println!("wrote {:?}", output);
    Ok(())
}

async fn seed(config: Config) -> anyhow::Result<()> {
    use metron::model::{
        Category, DefinitionFilter, Granularity, MetricConfiguration, MetricDefinition, MetricKind,
        ScheduleKind,
    };

    let runtime = build_runtime(config)?;
    let existing = runtime.catalog.count(&DefinitionFilter::new()).await?;
    if existing > 0 {
        anyhow::bail!("store already holds {} metrics, refusing to seed", existing);
    }

    let received = runtime
        .catalog
        .create(
            MetricDefinition::new(
                "requests_received",
                "Requests received",
                MetricKind::Count,
                Granularity::Day,
            )
            .category(Category::Requests)
            .description("Benefit requests opened during the period")
            .query_template(
                "SELECT COUNT(*) FROM requests \
                 WHERE created_at >= '${PERIODO_INICIO}' AND created_at < '${PERIODO_FIM}'",
            ),
        )
        .await?;

    let approved = runtime
        .catalog
        .create(
            MetricDefinition::new(
                "requests_approved",
                "Requests approved",
                MetricKind::Count,
                Granularity::Day,
            )
            .category(Category::Requests)
            .query_template(
                "SELECT COUNT(*) FROM requests \
                 WHERE status = 'approved' \
                 AND decided_at >= '${PERIODO_INICIO}' AND decided_at < '${PERIODO_FIM}'",
            ),
        )
        .await?;

    let rate = runtime
        .catalog
        .create(
            MetricDefinition::new(
                "approval_rate",
                "Approval rate",
                MetricKind::Composite,
                Granularity::Day,
            )
            .category(Category::Performance)
            .formula(
                "requests_approved / requests_received * 100",
                ["requests_approved", "requests_received"],
            )
            .display(None, Some("%"), 1),
        )
        .await?;

    for metric in [&received, &approved, &rate] {
        runtime
            .catalog
            .configure(MetricConfiguration::new(
                metric.id,
                ScheduleKind::Interval { seconds: 3600 },
            ))
            .await?;
    }

    println!(
        "seeded 3 metrics: {}, {}, {}",
        received.code, approved.code, rate.code
    );
    Ok(())
}

/// Successful values of the metric's recent history, oldest first
async fn history(runtime: &Runtime, code: &str, days: i64) -> anyhow::Result<Vec<f64>> {
    let definition = runtime.catalog.require(code).await?;
    let to = Utc::now();
    let from = to - ChronoDuration::days(days);
    let snapshots = runtime
        .store
        .snapshot_series(definition.id, from, to, None)
        .await?;
    Ok(snapshots
        .iter()
        .filter(|s| s.is_success())
        .filter_map(|s| s.value)
        .collect())
}

/// Parse `key=value` dimension arguments
fn parse_dimensions(args: &[String]) -> anyhow::Result<DimensionSet> {
    let mut dims = DimensionSet::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .with_context(|| format!("dimension '{}' is not key=value", arg))?;
        dims.insert(key, value);
    }
    Ok(dims)
}
