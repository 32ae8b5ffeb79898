use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::{Indicator, window};
use crate::model::BarSeries;

/// Simple moving average of closes ("DMA" in stored column names).
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "dma period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    fn name(&self) -> String {
        format!("dma_{}", self.period)
    }

    fn calculate(&self, series: &BarSeries) -> Vec<Option<f64>> {
        window::sma(&series.closes(), self.period)
    }
}

/// Exponential moving average of closes.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        if period == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "ema period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> String {
        format!("ema_{}", self.period)
    }

    fn calculate(&self, series: &BarSeries) -> Vec<Option<f64>> {
        window::ema(&series.closes(), self.period)
    }
}
