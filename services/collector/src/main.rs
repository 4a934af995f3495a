//! Collector - scrapes grid operator reports into the area_data store
//!
//! Usage:
//!   # Most recent month of every operator:
//!   cargo run --bin collector -- --tso all --scrape latest
//!
//!   # Full history of one operator, then hand its series to the forecaster:
//!   cargo run --bin collector -- --tso tepco --scrape all --predict
//!
//!   # Without a database:
//!   cargo run --bin collector -- --tso kyuden --scrape new --dry-run

use std::io::{self, Write};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use gridmix_collector::occto::{scrape_interconnectors, FLOW_URL_TEMPLATE};
use gridmix_collector::operators::{operator, Operator};
use gridmix_collector::predict::handoff_lines;
use gridmix_collector::{scrape_operator, AreaStore, Config, Fetcher, MemoryStore, PgStore, ScrapeScope, ScrapeSummary};
use gridmix_parser::{CarbonTables, Tso, JST};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Scrapes Japanese grid operator reports")]
struct Args {
    /// Operator id (hepco, tohoku, tepco, ...) or "all"
    #[arg(long, default_value = "all")]
    tso: String,

    /// Which files to fetch: all, new or latest
    #[arg(long, default_value = "latest", value_parser = ScrapeScope::from_str)]
    scrape: ScrapeScope,

    /// Emit the recent carbon-intensity series as JSON lines on stdout
    #[arg(long, default_value = "false")]
    predict: bool,

    /// Also scrape OCCTO interconnector flows for yesterday and today
    #[arg(long, default_value = "false")]
    interconnectors: bool,

    /// Re-download legacy files already recorded
    #[arg(long, default_value = "false")]
    force: bool,

    /// Dry run - keep everything in memory, no database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(io::stderr)
        .init();
}

fn selected_operators(arg: &str) -> Result<Vec<&'static Operator>> {
    if arg.trim().eq_ignore_ascii_case("all") {
        return Ok(Tso::ALL.into_iter().map(operator).collect());
    }
    let tso = Tso::from_str(arg).context("--tso must be an operator id or \"all\"")?;
    Ok(vec![operator(tso)])
}

async fn run<S: AreaStore>(
    args: &Args,
    fetcher: &Fetcher,
    store: &S,
    operators: &[&'static Operator],
    tables: &CarbonTables,
) -> Result<()> {
    let today: NaiveDate = Utc::now().with_timezone(&JST).date_naive();
    let mut summaries: Vec<ScrapeSummary> = Vec::new();
    let mut failed: Vec<Tso> = Vec::new();

    for op in operators {
        info!(tso = %op.tso, name = op.tso.display_name(), scope = %args.scrape, "scraping");
        match scrape_operator(fetcher, store, op, args.scrape, args.force, today).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                error!(tso = %op.tso, error = %format!("{e:#}"), "operator failed");
                failed.push(op.tso);
            }
        }
    }

    if args.interconnectors {
        let dates: Vec<NaiveDate> = today.pred_opt().into_iter().chain([today]).collect();
        let blocks = scrape_interconnectors(fetcher, store, FLOW_URL_TEMPLATE, &dates).await?;
        info!(blocks, "interconnector flows done");
    }

    if args.predict {
        for summary in &summaries {
            let Some(latest) = summary.latest_from_utc else {
                warn!(tso = %summary.tso, "nothing ingested, no hand-off");
                continue;
            };
            let lines = handoff_lines(store, summary.tso, latest, tables).await?;
            io::stdout().lock().write_all(&lines)?;
        }
    }

    let rows: usize = summaries.iter().map(|s| s.rows_written).sum();
    let files_failed: usize = summaries.iter().map(|s| s.files_failed).sum();
    info!(
        operators = summaries.len(),
        rows,
        files_failed,
        operators_failed = failed.len(),
        "collection summary"
    );

    if !failed.is_empty() {
        let ids: Vec<&str> = failed.iter().map(|t| t.id()).collect();
        bail!("{} operator(s) failed: {}", failed.len(), ids.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    let operators = selected_operators(&args.tso)?;
    let tables = config.load_carbon_tables()?;
    let fetcher = Fetcher::new(&config).context("Failed to build HTTP client")?;

    if args.dry_run {
        let store = MemoryStore::new();
        let outcome = run(&args, &fetcher, &store, &operators, &tables).await;
        store.log_summary();
        outcome
    } else {
        let store = PgStore::connect(config.db_url()?).await?;
        store.migrate().await?;
        run(&args, &fetcher, &store, &operators, &tables).await
    }
}
