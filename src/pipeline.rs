use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use derive_more::Display;
use error_stack::{Report, ResultExt};
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::batch::BatchProcessor;
use crate::error::{IndicatorError, PipelineError, StorageError};
use crate::model::{Bar, IndicatorRow};
use crate::source::BarSource;
use crate::storage::Store;
use crate::writer::UpsertWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureKind {
    /// The source had no bars for the symbol.
    #[display("no data")]
    DataAbsent,
    #[display("upstream failure")]
    Upstream,
    /// The engine rejected the fetched series.
    #[display("malformed series")]
    Malformed,
    /// The calculation task panicked or was aborted.
    #[display("calculation worker failed")]
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFailure {
    pub symbol: String,
    pub kind: FailureKind,
}

/// Outcome of one pipeline run. Per-symbol failures do not fail the run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub succeeded: Vec<String>,
    pub failures: Vec<SymbolFailure>,
    pub rows_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: u64,
    pub symbols: BTreeSet<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total records: {}", self.total_records)?;
        writeln!(f, "unique symbols: {}", self.symbols.len())?;
        match self.date_range {
            Some((first, last)) => write!(f, "date range: {first} to {last}"),
            None => write!(f, "date range: -"),
        }
    }
}

/// Fetch, compute and store indicators for a set of symbols.
pub struct Pipeline {
    source: Arc<dyn BarSource>,
    store: Arc<dyn Store>,
    processor: BatchProcessor,
    writer: UpsertWriter,
    workers: usize,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn BarSource>,
        store: Arc<dyn Store>,
        processor: BatchProcessor,
        writer: UpsertWriter,
        workers: usize,
    ) -> Self {
        Self {
            source,
            store,
            processor,
            writer,
            workers: workers.max(1),
        }
    }

    /// Symbols are processed once each, in first-seen order; repeats are
    /// ignored.
    pub async fn run(
        &self,
        symbols: &[String],
        exchange: &str,
        bar_count: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Report<PipelineError>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        let symbols = unique(symbols);
        self.run_inner(run_id, &symbols, exchange, bar_count, cancel)
            .instrument(span)
            .await
    }

    pub async fn update_symbol(
        &self,
        symbol: &str,
        exchange: &str,
        bar_count: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Report<PipelineError>> {
        self.run(&[symbol.to_owned()], exchange, bar_count, cancel)
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats, Report<StorageError>> {
        Ok(StoreStats {
            total_records: self.store.count().await?,
            symbols: self.store.distinct_symbols().await?,
            date_range: self.store.date_range().await?,
        })
    }

    /// Most recent stored row of `symbol`, if any.
    pub async fn latest(
        &self,
        symbol: &str,
    ) -> Result<Option<IndicatorRow>, Report<StorageError>> {
        let mut rows = self.store.rows_for_symbol(symbol).await?;
        Ok(rows.pop())
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        symbols: &[String],
        exchange: &str,
        bar_count: usize,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Report<PipelineError>> {
        info!(
            symbols = symbols.len(),
            exchange,
            bar_count,
            source = self.source.name(),
            "starting run"
        );

        let mut failures = Vec::new();
        let bars = tokio::select! {
            _ = cancel.cancelled() => {
                let report = Report::new(PipelineError::Cancelled);
                return Err(report.attach("cancelled while fetching"));
            }
            bars = self.fetch_all(symbols, exchange, bar_count, &mut failures) => bars,
        };

        if bars.is_empty() {
            warn!("no data fetched");
            return Ok(finish(run_id, symbols, Vec::new(), failures, 0));
        }
        info!(bars = bars.len(), "fetch complete");

        let output = self.processor.process(bars).await;
        failures.extend(output.failures.iter().map(|f| SymbolFailure {
            symbol: f.symbol.clone(),
            kind: failure_kind(&f.error),
        }));

        if cancel.is_cancelled() {
            let report = Report::new(PipelineError::Cancelled);
            return Err(report.attach("cancelled before write"));
        }

        let rows_written = self
            .writer
            .write(self.store.as_ref(), &output.rows, cancel)
            .await
            .map_err(|report| {
                let context = match report.current_context() {
                    StorageError::Cancelled => PipelineError::Cancelled,
                    _ => PipelineError::Storage,
                };
                report.change_context(context)
            })?;

        Ok(finish(
            run_id,
            symbols,
            output.computed,
            failures,
            rows_written,
        ))
    }

    async fn fetch_all(
        &self,
        symbols: &[String],
        exchange: &str,
        bar_count: usize,
        failures: &mut Vec<SymbolFailure>,
    ) -> Vec<Bar> {
        let fetched: Vec<_> = stream::iter(symbols)
            .map(|symbol| async move {
                info!(symbol = %symbol, "fetching bars");
                let result = self
                    .source
                    .fetch(symbol, exchange, bar_count)
                    .await
                    .attach_with(|| format!("symbol: {symbol}"));
                (symbol, result)
            })
            .buffered(self.workers)
            .collect()
            .await;

        let mut bars = Vec::new();
        for (symbol, result) in fetched {
            match result {
                Ok(Some(series)) if !series.is_empty() => {
                    info!(symbol = %symbol, bars = series.len(), "bars fetched");
                    bars.extend(series.bars);
                }
                Ok(_) => {
                    warn!(symbol = %symbol, "no data for symbol");
                    failures.push(SymbolFailure {
                        symbol: symbol.clone(),
                        kind: FailureKind::DataAbsent,
                    });
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = ?e, "fetch failed");
                    failures.push(SymbolFailure {
                        symbol: symbol.clone(),
                        kind: FailureKind::Upstream,
                    });
                }
            }
        }
        bars
    }
}

fn unique(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if seen.insert(symbol.as_str()) {
            out.push(symbol.clone());
        } else {
            warn!(symbol = %symbol, "duplicate symbol ignored");
        }
    }
    out
}

fn failure_kind(error: &Report<IndicatorError>) -> FailureKind {
    match error.current_context() {
        IndicatorError::Worker { .. } => FailureKind::Worker,
        _ => FailureKind::Malformed,
    }
}

fn finish(
    run_id: Uuid,
    symbols: &[String],
    succeeded: Vec<String>,
    mut failures: Vec<SymbolFailure>,
    rows_written: u64,
) -> RunSummary {
    let position: HashMap<&str, usize> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    failures.sort_by_key(|f| {
        position
            .get(f.symbol.as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });

    info!(
        succeeded = succeeded.len(),
        failed = failures.len(),
        rows_written,
        "run complete"
    );
    for failure in &failures {
        warn!(symbol = %failure.symbol, kind = %failure.kind, "symbol failed");
    }

    RunSummary {
        run_id,
        succeeded,
        failures,
        rows_written,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorConfig;
    use crate::error::SourceError;
    use crate::indicator::IndicatorEngine;
    use crate::model::BarSeries;
    use crate::storage::sqlite::SqliteStore;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Bars(Vec<Bar>),
        Absent,
        Fail,
    }

    struct FakeSource {
        replies: HashMap<String, Reply>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(replies: Vec<(&str, Reply)>) -> Self {
            Self {
                replies: replies.into_iter().map(|(s, r)| (s.to_owned(), r)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BarSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch(
            &self,
            symbol: &str,
            _exchange: &str,
            bar_count: usize,
        ) -> BoxFuture<'_, Result<Option<BarSeries>, Report<SourceError>>> {
            let symbol = symbol.to_owned();
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match self.replies.get(&symbol) {
                    Some(Reply::Bars(bars)) => {
                        let skip = bars.len().saturating_sub(bar_count);
                        Ok(Some(BarSeries::new(symbol, bars[skip..].to_vec())))
                    }
                    Some(Reply::Fail) => Err(Report::new(SourceError::Request {
                        source_name: "fake".into(),
                    })),
                    Some(Reply::Absent) | None => Ok(None),
                }
            })
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn bars(symbol: &str, n: i64, base: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = base + (i as f64 * 0.3).cos() * 3.0 + i as f64 * 0.1;
                Bar {
                    symbol: symbol.into(),
                    date: day(1) + chrono::Duration::days(i),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10_000.0 + i as f64,
                }
            })
            .collect()
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn pipeline(
        source: Arc<FakeSource>,
        batch_size: usize,
    ) -> (Pipeline, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await);
        let engine = IndicatorEngine::new(&IndicatorConfig::default()).unwrap();
        let pipeline = Pipeline::new(
            source,
            store.clone(),
            BatchProcessor::new(engine, 2),
            UpsertWriter::new(batch_size),
            2,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn run_reports_partial_success() {
        let source = Arc::new(FakeSource::new(vec![
            ("TCS", Reply::Bars(bars("TCS", 30, 100.0))),
            ("GONE", Reply::Absent),
            ("INFY", Reply::Bars(bars("INFY", 25, 50.0))),
            ("DOWN", Reply::Fail),
        ]));
        let (pipeline, store) = pipeline(source, 10).await;
        let names = symbols(&["TCS", "GONE", "INFY", "DOWN"]);
        let cancel = CancellationToken::new();

        let summary = pipeline.run(&names, "NSE", 400, &cancel).await.unwrap();

        assert_eq!(summary.succeeded, vec!["TCS", "INFY"]);
        assert_eq!(
            summary.failures,
            vec![
                SymbolFailure {
                    symbol: "GONE".into(),
                    kind: FailureKind::DataAbsent,
                },
                SymbolFailure {
                    symbol: "DOWN".into(),
                    kind: FailureKind::Upstream,
                },
            ]
        );
        assert_eq!(summary.rows_written, 55);
        assert_eq!(store.count().await.unwrap(), 55);
    }

    #[tokio::test]
    async fn repeated_symbol_processed_once() {
        let source = Arc::new(FakeSource::new(vec![(
            "TCS",
            Reply::Bars(bars("TCS", 20, 100.0)),
        )]));
        let (pipeline, store) = pipeline(source.clone(), 1000).await;
        let cancel = CancellationToken::new();

        let summary = pipeline
            .run(&symbols(&["TCS", "TCS"]), "NSE", 400, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, vec!["TCS"]);
        assert!(summary.failures.is_empty());
        assert_eq!(summary.rows_written, 20);
        assert_eq!(store.count().await.unwrap(), 20);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bar_count_limits_fetched_history() {
        let source = Arc::new(FakeSource::new(vec![(
            "TCS",
            Reply::Bars(bars("TCS", 30, 100.0)),
        )]));
        let (pipeline, store) = pipeline(source, 1000).await;

        let summary = pipeline
            .update_symbol("TCS", "NSE", 12, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.rows_written, 12);
        let stored = store.rows_for_symbol("TCS").await.unwrap();
        assert_eq!(stored[0].date(), day(19));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let source = Arc::new(FakeSource::new(vec![(
            "TCS",
            Reply::Bars(bars("TCS", 40, 100.0)),
        )]));
        let (pipeline, store) = pipeline(source, 7).await;
        let cancel = CancellationToken::new();

        pipeline
            .update_symbol("TCS", "NSE", 400, &cancel)
            .await
            .unwrap();
        let first = store.rows_for_symbol("TCS").await.unwrap();
        pipeline
            .update_symbol("TCS", "NSE", 400, &cancel)
            .await
            .unwrap();
        let second = store.rows_for_symbol("TCS").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn malformed_series_isolated_from_others() {
        let mut broken = bars("BAD", 10, 20.0);
        broken.push(broken[4].clone());
        let source = Arc::new(FakeSource::new(vec![
            ("BAD", Reply::Bars(broken)),
            ("TCS", Reply::Bars(bars("TCS", 20, 100.0))),
        ]));
        let (pipeline, store) = pipeline(source, 1000).await;
        let cancel = CancellationToken::new();

        let summary = pipeline
            .run(&symbols(&["BAD", "TCS"]), "NSE", 400, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, vec!["TCS"]);
        assert_eq!(summary.failures[0].kind, FailureKind::Malformed);
        assert_eq!(
            store.distinct_symbols().await.unwrap(),
            BTreeSet::from(["TCS".to_owned()])
        );
    }

    #[test]
    fn compute_failures_classified_by_cause() {
        let malformed = Report::new(IndicatorError::MalformedSeries {
            symbol: "BAD".into(),
            reason: "dates are not strictly increasing".into(),
        });
        let worker = Report::new(IndicatorError::Worker {
            symbol: "BAD".into(),
        });

        assert_eq!(failure_kind(&malformed), FailureKind::Malformed);
        assert_eq!(failure_kind(&worker), FailureKind::Worker);
        assert_eq!(FailureKind::Worker.to_string(), "calculation worker failed");
    }

    #[tokio::test]
    async fn storage_failure_is_fatal_and_persists_nothing() {
        let mut poisoned = bars("INFY", 20, 50.0);
        poisoned[15].open = f64::NAN;
        let source = Arc::new(FakeSource::new(vec![
            ("TCS", Reply::Bars(bars("TCS", 20, 100.0))),
            ("INFY", Reply::Bars(poisoned)),
        ]));
        let (pipeline, store) = pipeline(source, 8).await;
        let cancel = CancellationToken::new();

        let err = pipeline
            .run(&symbols(&["TCS", "INFY"]), "NSE", 400, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err.current_context(), PipelineError::Storage));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let source = Arc::new(FakeSource::new(vec![(
            "TCS",
            Reply::Bars(bars("TCS", 20, 100.0)),
        )]));
        let (pipeline, store) = pipeline(source, 1000).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .update_symbol("TCS", "NSE", 400, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err.current_context(), PipelineError::Cancelled));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nothing_fetched_writes_nothing() {
        let source = Arc::new(FakeSource::new(vec![("GONE", Reply::Absent)]));
        let (pipeline, store) = pipeline(source, 1000).await;

        let summary = pipeline
            .update_symbol("GONE", "NSE", 400, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.rows_written, 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stats_reflect_store_contents() {
        let source = Arc::new(FakeSource::new(vec![
            ("TCS", Reply::Bars(bars("TCS", 10, 100.0))),
            ("INFY", Reply::Bars(bars("INFY", 5, 50.0))),
        ]));
        let (pipeline, _store) = pipeline(source, 1000).await;
        let cancel = CancellationToken::new();

        let empty = pipeline.stats().await.unwrap();
        assert_eq!(empty.total_records, 0);
        assert_eq!(empty.date_range, None);

        pipeline
            .run(&symbols(&["TCS", "INFY"]), "NSE", 400, &cancel)
            .await
            .unwrap();

        let stats = pipeline.stats().await.unwrap();
        assert_eq!(stats.total_records, 15);
        assert_eq!(stats.symbols.len(), 2);
        assert_eq!(stats.date_range, Some((day(1), day(10))));
        assert!(stats.to_string().contains("total records: 15"));
    }

    #[tokio::test]
    async fn latest_returns_most_recent_row() {
        let source = Arc::new(FakeSource::new(vec![(
            "TCS",
            Reply::Bars(bars("TCS", 10, 100.0)),
        )]));
        let (pipeline, _store) = pipeline(source, 1000).await;

        assert!(pipeline.latest("TCS").await.unwrap().is_none());
        pipeline
            .update_symbol("TCS", "NSE", 400, &CancellationToken::new())
            .await
            .unwrap();

        let latest = pipeline.latest("TCS").await.unwrap().unwrap();
        assert_eq!(latest.date(), day(10));
        assert!(latest.dma.get(10).is_some());
        assert!(latest.dma.get(21).is_none());
    }
}
