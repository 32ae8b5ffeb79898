use std::collections::HashMap;
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use futures::StreamExt;
use futures::stream;
use tracing::{info, warn};

use crate::error::IndicatorError;
use crate::indicator::IndicatorEngine;
use crate::model::{Bar, BarSeries, IndicatorRow};

/// A symbol whose series the engine rejected or whose worker died.
#[derive(Debug)]
pub struct ComputeFailure {
    pub symbol: String,
    pub error: Report<IndicatorError>,
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Rows grouped by symbol in first-seen order, each group in date order.
    pub rows: Vec<IndicatorRow>,
    /// Symbols that produced rows, in output order.
    pub computed: Vec<String>,
    pub failures: Vec<ComputeFailure>,
}

/// Runs the indicator engine over many symbols at once.
///
/// Each symbol is computed in isolation on the blocking pool, at most
/// `workers` at a time. Results are merged back in the order symbols were
/// first seen in the input, so the output does not depend on scheduling.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    engine: Arc<IndicatorEngine>,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(engine: IndicatorEngine, workers: usize) -> Self {
        Self {
            engine: Arc::new(engine),
            workers: workers.max(1),
        }
    }

    pub async fn process(&self, bars: Vec<Bar>) -> BatchOutput {
        let partitions = partition(bars);
        info!(symbols = partitions.len(), "calculating indicators");

        let results: Vec<(String, Result<Vec<IndicatorRow>, Report<IndicatorError>>)> =
            stream::iter(partitions)
                .map(|series| {
                    let engine = Arc::clone(&self.engine);
                    let symbol = series.symbol.clone();
                    async move {
                        let result = tokio::task::spawn_blocking(move || engine.compute(&series))
                            .await
                            .change_context(IndicatorError::Worker {
                                symbol: symbol.clone(),
                            })
                            .and_then(|computed| computed);
                        (symbol, result)
                    }
                })
                .buffered(self.workers)
                .collect()
                .await;

        let mut output = BatchOutput::default();
        for (symbol, result) in results {
            match result {
                Ok(rows) => {
                    info!(symbol = %symbol, rows = rows.len(), "indicators calculated");
                    output.rows.extend(rows);
                    output.computed.push(symbol);
                }
                Err(error) => {
                    warn!(symbol = %symbol, error = ?error, "indicator calculation failed");
                    output.failures.push(ComputeFailure { symbol, error });
                }
            }
        }
        output
    }
}

/// Split bars by symbol, keeping first-seen symbol order, and sort each
/// partition by date.
pub fn partition(bars: Vec<Bar>) -> Vec<BarSeries> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<BarSeries> = Vec::new();

    for bar in bars {
        let slot = match index.get(&bar.symbol) {
            Some(&slot) => slot,
            None => {
                index.insert(bar.symbol.clone(), partitions.len());
                partitions.push(BarSeries::new(bar.symbol.clone(), Vec::new()));
                partitions.len() - 1
            }
        };
        partitions[slot].bars.push(bar);
    }

    for series in &mut partitions {
        series.sort_by_date();
    }
    partitions
}
