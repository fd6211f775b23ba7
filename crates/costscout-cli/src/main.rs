use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use costscout_client::{SiteDefinition, load_sites};
use costscout_core::metrics::{FanoutMetrics, InMemoryMetrics, MetricsSink, TracingMetrics};
use costscout_core::orchestrator::{RunFailure, ScraperService};
use costscout_core::traits::{NullStore, RecordStore};
use costscout_core::validation::{GateConfig, ValidationGate};
use costscout_core::validator::RuleValidator;
use costscout_db::{CostDataRepository, Database, DatabaseConfig, StoredRecord};

#[derive(Parser)]
#[command(name = "costscout", version, about = "Cost data acquisition pipeline")]
struct Cli {
    /// Path to the JSON site definitions file
    #[arg(long, global = true, env = "COSTSCOUT_SITES", default_value = "sites.json")]
    sites: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sources defined in the sites file
    List,

    /// Run one source and print its result as JSON
    Run {
        /// Source name, as listed by `costscout list`
        #[arg(short, long)]
        source: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Run every source sequentially and print all results as JSON
    RunAll {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Show recently stored records
    History {
        /// Only records from this source
        #[arg(short, long)]
        source: Option<String>,

        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Args, Clone)]
struct RunOptions {
    /// Scrape and validate but do not write to the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Skip validation and save every extracted record
    #[arg(long, env = "COSTSCOUT_NO_VALIDATION", default_value_t = false)]
    no_validation: bool,

    /// Minimum quality score for a record to be saved
    #[arg(long, env = "COSTSCOUT_MIN_QUALITY", default_value_t = 0.5)]
    min_quality: f64,

    /// Fail the run when the validator itself errors
    #[arg(long, env = "COSTSCOUT_FAIL_ON_VALIDATION", default_value_t = false)]
    fail_on_validation: bool,
}

impl RunOptions {
    fn gate_config(&self) -> GateConfig {
        let base = if self.no_validation {
            GateConfig::disabled()
        } else {
            GateConfig::default()
        };
        base.with_min_quality_score(self.min_quality)
            .with_fail_on_validation(self.fail_on_validation)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Csv,
}

enum Target {
    One(String),
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the JSON/CSV output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("costscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cmd_list(&cli.sites),
        Commands::Run { source, options } => {
            cmd_run(&cli.sites, Target::One(source), &options).await
        }
        Commands::RunAll { options } => cmd_run(&cli.sites, Target::All, &options).await,
        Commands::History {
            source,
            limit,
            format,
        } => {
            let db = connect_db().await?;
            cmd_history(&db.records(), source.as_deref(), limit, format).await
        }
    }
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn read_sites(path: &Path) -> Result<Vec<SiteDefinition>> {
    load_sites(path).with_context(|| format!("Failed to load sites from {}", path.display()))
}

fn cmd_list(path: &Path) -> Result<()> {
    for site in read_sites(path)? {
        println!("{}\t{}", site.name, site.urls.join(" "));
    }
    Ok(())
}

/// Cancel the token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn cmd_run(path: &Path, target: Target, options: &RunOptions) -> Result<()> {
    let sites = read_sites(path)?;
    let cancel = cancel_on_ctrl_c();

    if options.dry_run {
        tracing::info!("Dry run, records will not be saved");
        execute(NullStore, &sites, target, options.gate_config(), &cancel).await
    } else {
        let db = connect_db().await?;
        execute(db.records(), &sites, target, options.gate_config(), &cancel).await
    }
}

async fn execute<S: RecordStore>(
    store: S,
    sites: &[SiteDefinition],
    target: Target,
    gate: GateConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let counters = Arc::new(InMemoryMetrics::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![counters.clone(), Arc::new(TracingMetrics)];
    let metrics: Arc<dyn MetricsSink> = Arc::new(FanoutMetrics::new(sinks));

    let service = ScraperService::new(ValidationGate::new(RuleValidator::default(), gate), store)
        .with_metrics(metrics.clone());
    for site in sites {
        let source = site
            .build_source(metrics.clone())
            .with_context(|| format!("Invalid site definition '{}'", site.name))?;
        service.register_scraper(Arc::new(source));
    }

    let outcome = match target {
        Target::One(name) => match service.run_scraper(&name, cancel).await {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(())
            }
            Err(RunFailure { result, error }) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Err(anyhow::Error::new(error).context(format!("Scraper '{name}' failed")))
            }
        },
        Target::All => {
            let report = service.run_all_scrapers(cancel).await;
            println!("{}", serde_json::to_string_pretty(&report.results)?);
            match report.error {
                Some(err) => Err(anyhow::Error::new(err).context("Some scrapers failed")),
                None => Ok(()),
            }
        }
    };

    tracing::debug!(metrics = %serde_json::to_string(&counters.snapshot())?, "Run metrics");
    outcome
}

async fn cmd_history(
    repo: &CostDataRepository,
    source: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let records = repo.recent(source, limit).await?;

    if records.is_empty() {
        tracing::info!(source = source.unwrap_or("*"), "No records found");
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Csv => write_csv(std::io::stdout(), &records)?,
    }
    Ok(())
}

/// Flat row for CSV export; list and map fields are joined.
#[derive(serde::Serialize)]
struct HistoryRow<'a> {
    id: String,
    recorded_at: String,
    source: &'a str,
    category: &'a str,
    subcategory: &'a str,
    item_name: &'a str,
    price: f64,
    price_min: Option<f64>,
    price_max: Option<f64>,
    currency: &'a str,
    unit: &'a str,
    location: &'a str,
    confidence: f64,
    source_url: &'a str,
    tags: String,
}

impl<'a> From<&'a StoredRecord> for HistoryRow<'a> {
    fn from(stored: &'a StoredRecord) -> Self {
        let r = &stored.record;
        Self {
            id: stored.id.to_string(),
            recorded_at: r.recorded_at.to_rfc3339(),
            source: &r.source,
            category: &r.category,
            subcategory: r.subcategory.as_deref().unwrap_or(""),
            item_name: &r.item_name,
            price: r.price,
            price_min: r.price_min,
            price_max: r.price_max,
            currency: &r.currency,
            unit: &r.unit,
            location: &r.location,
            confidence: r.confidence,
            source_url: &r.source_url,
            tags: r.tags.join(";"),
        }
    }
}

fn write_csv<W: std::io::Write>(out: W, records: &[StoredRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for stored in records {
        writer.serialize(HistoryRow::from(stored))?;
    }
    writer.flush()?;
    Ok(())
}
