use chrono::NaiveDate;

/// One traded day for one symbol.
///
/// OHLC consistency (`low <= open, close <= high`) is not checked here; rows
/// are carried through as the source delivered them.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily bars for exactly one symbol, ordered by date (oldest first).
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Stable sort by date. Equal dates keep their relative order.
    pub fn sort_by_date(&mut self) {
        self.bars.sort_by_key(|b| b.date);
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

/// Moving-average values keyed by period, in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodValues(Vec<(usize, Option<f64>)>);

impl PeriodValues {
    pub fn new(values: Vec<(usize, Option<f64>)>) -> Self {
        Self(values)
    }

    /// Value for `period`; `None` when the period is not configured or the
    /// window was not yet full on this row.
    pub fn get(&self, period: usize) -> Option<f64> {
        self.0
            .iter()
            .find(|(p, _)| *p == period)
            .and_then(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtremumFlags {
    pub is_52_week_high: bool,
    pub is_52_week_low: bool,
    pub is_all_time_high: bool,
    pub is_all_time_low: bool,
}

/// A bar together with every indicator derived for its date.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub bar: Bar,
    pub t_score: Option<f64>,
    /// Number of satisfied trend/volume conditions, `0..=9`.
    pub f_score: u8,
    pub dma: PeriodValues,
    pub ema: PeriodValues,
    pub flags: ExtremumFlags,
}

impl IndicatorRow {
    pub fn symbol(&self) -> &str {
        &self.bar.symbol
    }

    pub fn date(&self) -> NaiveDate {
        self.bar.date
    }
}
