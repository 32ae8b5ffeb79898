use error_stack::{Report, bail};
use tracing::debug;

use crate::config::IndicatorConfig;
use crate::error::IndicatorError;
use crate::indicator::Indicator;
use crate::indicator::extremum::Extremes;
use crate::indicator::ma::{Ema, Sma};
use crate::indicator::score::{FScore, TScore};
use crate::model::{BarSeries, IndicatorRow, PeriodValues};

/// Computes every stored indicator for one symbol's series.
///
/// Pure and stateless after construction: the same series always yields the
/// same rows, and nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    dma: Vec<Sma>,
    ema: Vec<Ema>,
    t_score: TScore,
    f_score: FScore,
    extremes: Extremes,
}

impl IndicatorEngine {
    pub fn new(config: &IndicatorConfig) -> Result<Self, Report<IndicatorError>> {
        let dma = config
            .dma_periods
            .iter()
            .map(|&p| Sma::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let ema = config
            .ema_periods
            .iter()
            .map(|&p| Ema::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dma,
            ema,
            t_score: TScore::new(config.t_score_lookback)?,
            f_score: FScore,
            extremes: Extremes::new(config.week52_days)?,
        })
    }

    /// Compute one row per bar, in the series' order.
    ///
    /// The series must already be sorted by date. A series with repeated or
    /// decreasing dates, or with bars from another symbol, is rejected with
    /// `MalformedSeries` rather than producing meaningless windows. An empty
    /// series yields no rows.
    pub fn compute(&self, series: &BarSeries) -> Result<Vec<IndicatorRow>, Report<IndicatorError>> {
        check_series(series)?;
        if series.is_empty() {
            return Ok(Vec::new());
        }

        let t_score = self.t_score.calculate(series);
        let f_score = self.f_score.calculate(series);
        let dma = columns(&self.dma, series, Sma::period);
        let ema = columns(&self.ema, series, Ema::period);
        let flags = self.extremes.calculate(series);

        debug!(
            symbol = %series.symbol,
            rows = series.len(),
            dma = ?self.dma.iter().map(Indicator::name).collect::<Vec<_>>(),
            ema = ?self.ema.iter().map(Indicator::name).collect::<Vec<_>>(),
            "indicators computed"
        );

        let rows = series
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| IndicatorRow {
                bar: bar.clone(),
                t_score: t_score[i],
                f_score: f_score[i],
                dma: row_values(&dma, i),
                ema: row_values(&ema, i),
                flags: flags[i],
            })
            .collect();

        Ok(rows)
    }
}

type Column = (usize, Vec<Option<f64>>);

fn columns<I: Indicator>(
    indicators: &[I],
    series: &BarSeries,
    period: fn(&I) -> usize,
) -> Vec<Column> {
    indicators
        .iter()
        .map(|ind| (period(ind), ind.calculate(series)))
        .collect()
}

fn row_values(columns: &[Column], row: usize) -> PeriodValues {
    let values = columns
        .iter()
        .map(|(p, values)| (*p, values[row]))
        .collect();
    PeriodValues::new(values)
}

fn check_series(series: &BarSeries) -> Result<(), Report<IndicatorError>> {
    let malformed = |reason: String| IndicatorError::MalformedSeries {
        symbol: series.symbol.clone(),
        reason,
    };

    if let Some(bar) = series.bars.iter().find(|b| b.symbol != series.symbol) {
        bail!(malformed(format!("contains a bar for {}", bar.symbol)));
    }

    if let Some(pair) = series.bars.windows(2).find(|w| w[0].date >= w[1].date) {
        let reason = "dates are not strictly increasing".to_owned();
        let order = format!("{} followed by {}", pair[0].date, pair[1].date);
        return Err(Report::new(malformed(reason)).attach(order));
    }

    Ok(())
}
