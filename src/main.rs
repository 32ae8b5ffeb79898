mod batch;
mod config;
mod error;
mod indicator;
mod model;
mod pipeline;
mod source;
mod storage;
mod writer;

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batch::BatchProcessor;
use config::AppConfig;
use indicator::IndicatorEngine;
use pipeline::{Pipeline, RunSummary};
use source::yahoo::YahooSource;
use storage::Store;
use storage::schema::MA_COLUMN_PERIODS;
use storage::sqlite::SqliteStore;
use writer::UpsertWriter;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("data source error")]
    Source,
    #[display("indicator setup error")]
    Indicator,
    #[display("pipeline error")]
    Pipeline,
}

#[derive(Parser)]
#[command(name = "equity-indicators", about = "Daily equity indicator calculator")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and apply migrations
    Init,
    /// Fetch, calculate and store indicators for many symbols
    Run {
        /// Comma-separated symbols (defaults to `pipeline.symbols`)
        #[arg(long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
        #[arg(long)]
        exchange: Option<String>,
        /// Daily bars to fetch per symbol
        #[arg(long)]
        bars: Option<usize>,
    },
    /// Recalculate a single symbol
    Update {
        symbol: String,
        #[arg(long)]
        exchange: Option<String>,
    },
    /// Print database statistics, or the latest stored row of one symbol
    Stats {
        #[arg(long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config))
        .change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Storage ───────────────────────────────────────────────────────────────
    let data_dir = &config.general.data_dir;
    std::fs::create_dir_all(data_dir)
        .change_context(AppError::Storage)
        .attach_with(|| format!("data_dir: {data_dir}"))?;

    let db_path = format!("{data_dir}/stock_data.db");
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );

    if let Command::Init = cli.command {
        info!(path = %db_path, "database initialised");
        return Ok(());
    }

    let pipeline = build_pipeline(&config, Arc::clone(&store))?;

    // ── Shutdown ──────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl+c received, cancelling");
                cancel.cancel();
            }
        })
    };

    let result = match cli.command {
        Command::Init => Ok(()),
        Command::Run {
            symbols,
            exchange,
            bars,
        } => {
            let symbols = symbols.unwrap_or_else(|| config.pipeline.symbols.clone());
            if symbols.is_empty() {
                warn!("no symbols given and pipeline.symbols is empty; nothing to do");
                Ok(())
            } else {
                let exchange = exchange.unwrap_or_else(|| config.pipeline.exchange.clone());
                let bars = bars.unwrap_or_else(|| config.pipeline.bar_count());
                run_pipeline(&pipeline, &symbols, &exchange, bars, &cancel).await
            }
        }
        Command::Update { symbol, exchange } => {
            let exchange = exchange.unwrap_or_else(|| config.pipeline.exchange.clone());
            let summary = pipeline
                .update_symbol(&symbol, &exchange, config.pipeline.bar_count(), &cancel)
                .await
                .change_context(AppError::Pipeline)?;
            print_summary(&summary);
            Ok(())
        }
        Command::Stats { symbol: None } => print_stats(&pipeline).await,
        Command::Stats {
            symbol: Some(symbol),
        } => print_latest(&pipeline, &symbol).await,
    };

    ctrl_c.abort();
    result
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_pipeline(config: &AppConfig, store: Arc<dyn Store>) -> Result<Pipeline, Report<AppError>> {
    let engine = IndicatorEngine::new(&config.indicators)
        .change_context(AppError::Indicator)?;
    let source = YahooSource::new(&config.source)
        .change_context(AppError::Source)?;
    let workers = config.pipeline.workers;

    Ok(Pipeline::new(
        Arc::new(source),
        store,
        BatchProcessor::new(engine, workers),
        UpsertWriter::new(config.pipeline.batch_size),
        workers,
    ))
}

async fn run_pipeline(
    pipeline: &Pipeline,
    symbols: &[String],
    exchange: &str,
    bars: usize,
    cancel: &CancellationToken,
) -> Result<(), Report<AppError>> {
    let summary = pipeline
        .run(symbols, exchange, bars, cancel)
        .await
        .change_context(AppError::Pipeline)?;
    print_summary(&summary);
    print_stats(pipeline).await
}

fn print_summary(summary: &RunSummary) {
    println!("run {}", summary.run_id);
    println!(
        "succeeded: {}, failed: {}, rows stored: {}",
        summary.succeeded.len(),
        summary.failures.len(),
        summary.rows_written
    );
    for failure in &summary.failures {
        println!("  {}: {}", failure.symbol, failure.kind);
    }
}

async fn print_stats(pipeline: &Pipeline) -> Result<(), Report<AppError>> {
    let stats = pipeline.stats().await.change_context(AppError::Storage)?;
    println!("{stats}");
    Ok(())
}

async fn print_latest(pipeline: &Pipeline, symbol: &str) -> Result<(), Report<AppError>> {
    let latest = pipeline
        .latest(symbol)
        .await
        .change_context(AppError::Storage)?;
    let Some(row) = latest else {
        println!("{symbol}: no stored rows");
        return Ok(());
    };

    let bar = &row.bar;
    println!("{} {}", row.symbol(), row.date());
    println!("open: {}", bar.open);
    println!("high: {}", bar.high);
    println!("low: {}", bar.low);
    println!("close: {}", bar.close);
    println!("volume: {}", bar.volume);
    match row.t_score {
        Some(t) => println!("t_score: {t:.2}"),
        None => println!("t_score: -"),
    }
    println!("f_score: {}", row.f_score);
    for (label, values) in [("dma", &row.dma), ("ema", &row.ema)] {
        for period in MA_COLUMN_PERIODS {
            match values.get(period) {
                Some(v) => println!("{label}_{period}: {v:.2}"),
                None => println!("{label}_{period}: -"),
            }
        }
    }
    let flags = &row.flags;
    println!("52-week high: {}", flags.is_52_week_high);
    println!("52-week low: {}", flags.is_52_week_low);
    println!("all-time high: {}", flags.is_all_time_high);
    println!("all-time low: {}", flags.is_all_time_low);
    Ok(())
}
