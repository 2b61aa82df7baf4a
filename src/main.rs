use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use configuration::{init_tracing, load_config, Config};
use core_types::{ListIndicesParams, PriceObservation, TaskStatus};
use engine::{EngineError, Services};
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// The main entry point for the index percentile service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment overrides may live in a .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Serve => web_server::run_server(config).await,
        Commands::Refresh => handle_refresh(&config).await,
        Commands::List(args) => handle_list(&config, args).await,
        Commands::ImportIndices(args) => handle_import_indices(&config, args).await,
        Commands::ImportPrices(args) => handle_import_prices(&config, args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Percentile rankings, heatmap and distribution for tracked market indices.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with background refreshes.
    Serve,
    /// Run one refresh and wait for it to finish. The results are stored and
    /// served by the next `serve` or `list`.
    Refresh,
    /// Print the index list from the last stored refresh as a table.
    List(ListArgs),
    /// Create or rename indices from a CSV file with columns code,name,full_name.
    ImportIndices(ImportIndicesArgs),
    /// Append prices for one index from a CSV file with columns date,close.
    ImportPrices(ImportPricesArgs),
}

#[derive(Parser)]
struct ListArgs {
    /// Case-insensitive search over code, name and full name.
    #[arg(long)]
    q: Option<String>,

    /// code, name, current_price, percentile_1m, percentile_3y, percentile, updated_at.
    #[arg(long)]
    sort_by: Option<String>,

    /// asc or desc.
    #[arg(long)]
    sort_order: Option<String>,

    #[arg(long)]
    page: Option<i64>,

    #[arg(long)]
    page_size: Option<i64>,
}

#[derive(Parser)]
struct ImportIndicesArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Parser)]
struct ImportPricesArgs {
    /// The index the prices belong to (e.g., "000300").
    #[arg(long)]
    code: String,

    #[arg(long)]
    file: PathBuf,
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// Triggers a refresh and follows its progress until it finishes.
async fn handle_refresh(config: &Config) -> anyhow::Result<()> {
    let services = Services::bootstrap(config).await?;
    run_refresh(&services, true).await
}

async fn run_refresh(services: &Services, show_progress: bool) -> anyhow::Result<()> {
    let task = services.refresh.trigger().await?;

    let progress_bar = if show_progress { ProgressBar::new(0) } else { ProgressBar::hidden() };
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let finished = loop {
        let view = services.refresh.task(&task.task_id).await?;
        if let Some(progress) = &view.progress {
            progress_bar.set_length(progress.total_count as u64);
            progress_bar.set_position(progress.processed_count as u64);
            progress_bar.set_message(format!("insufficient={}", progress.insufficient_count));
        }
        if view.task.status.is_terminal() {
            break view.task;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    let message = finished.message.unwrap_or_default();
    progress_bar.finish_with_message(message.clone());
    if finished.status == TaskStatus::Failed {
        bail!("refresh {} failed: {message}", finished.task_id);
    }
    Ok(())
}

/// Lists from the stored refresh results, computing them first if none exist yet.
async fn handle_list(config: &Config, args: ListArgs) -> anyhow::Result<()> {
    let services = Services::bootstrap(config).await?;
    match services.query.snapshot_task_id() {
        Some(task_id) => tracing::debug!(%task_id, "Listing stored refresh results."),
        None => run_refresh(&services, false).await?,
    }

    let params = ListIndicesParams {
        q: args.q,
        page: args.page,
        page_size: args.page_size,
        sort_by: args.sort_by,
        sort_order: args.sort_order,
    };
    let page = services.query.list_indices(&params).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Code", "Name", "Price", "1M %", "3Y %", "All %", "Updated",
    ]);
    let show = |value: Option<Decimal>| value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
    for item in &page.items {
        table.add_row(vec![
            item.code.clone(),
            item.name.clone(),
            show(item.current_price),
            show(item.percentile_1m),
            show(item.percentile_3y),
            show(item.percentile_since_inception),
            item.updated_at.format("%Y-%m-%d").to_string(),
        ]);
    }

    println!("{table}");
    println!("Page {} ({} per page), {} indices in total.", page.page, page.page_size, page.total);
    Ok(())
}

#[derive(Debug, Deserialize, PartialEq)]
struct IndexRecord {
    code: String,
    name: String,
    #[serde(default)]
    full_name: Option<String>,
}

async fn handle_import_indices(config: &Config, args: ImportIndicesArgs) -> anyhow::Result<()> {
    let records: Vec<IndexRecord> = read_csv(&args.file)?;
    let services = Services::bootstrap(config).await?;

    for record in &records {
        services
            .ingest
            .upsert_index(&record.code, &record.name, record.full_name.as_deref())
            .await
            .with_context(|| format!("importing index {}", record.code))?;
    }

    println!("Imported {} indices from {}.", records.len(), args.file.display());
    Ok(())
}

#[derive(Debug, Deserialize, PartialEq)]
struct PriceRecord {
    date: String,
    close: String,
}

impl PriceRecord {
    fn to_observation(&self) -> anyhow::Result<PriceObservation> {
        let price = Decimal::from_str(self.close.trim())
            .with_context(|| format!("invalid close '{}'", self.close))?;
        Ok(PriceObservation { timestamp: parse_date(&self.date)?, price })
    }
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_date(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid date '{raw}'"))
}

async fn handle_import_prices(config: &Config, args: ImportPricesArgs) -> anyhow::Result<()> {
    let records: Vec<PriceRecord> = read_csv(&args.file)?;
    let services = Services::bootstrap(config).await?;

    let progress_bar = ProgressBar::new(records.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let (mut appended, mut skipped) = (0usize, 0usize);
    for (line, record) in records.iter().enumerate() {
        let observation = record.to_observation().with_context(|| format!("row {}", line + 1))?;
        match services.ingest.append_observation(&args.code, observation).await {
            Ok(_) => appended += 1,
            Err(EngineError::OutOfOrder(reason)) => {
                tracing::warn!(row = line + 1, %reason, "Skipping out-of-order row.");
                skipped += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("row {}", line + 1)),
        }
        progress_bar.inc(1);
    }

    progress_bar.finish_with_message(format!("appended={appended}, skipped={skipped}"));
    println!("Imported {appended} prices for {} ({skipped} out-of-order rows skipped).", args.code);
    Ok(())
}

fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_csv(file)
}

fn parse_csv<T: for<'de> Deserialize<'de>, R: Read>(input: R) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(input);
    let mut records = Vec::new();
    for result in reader.deserialize::<T>() {
        records.push(result?);
    }
    Ok(records)
}
