use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::Indicator;
use crate::indicator::window::{self, greater};
use crate::model::BarSeries;

/// Keeps the denominator non-zero on a flat range.
const T_SCORE_EPSILON: f64 = 1e-10;

/// Position of the close inside the trailing high/low range, scaled to 0..100.
#[derive(Debug, Clone)]
pub struct TScore {
    lookback: usize,
}

impl TScore {
    pub fn new(lookback: usize) -> Result<Self, Report<IndicatorError>> {
        if lookback == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "t_score lookback must be > 0".into(),
            });
        }
        Ok(Self { lookback })
    }
}

impl Indicator for TScore {
    fn name(&self) -> String {
        "t_score".into()
    }

    fn calculate(&self, series: &BarSeries) -> Vec<Option<f64>> {
        let highest = window::rolling_max(&series.highs(), self.lookback, self.lookback);
        let lowest = window::rolling_min(&series.lows(), self.lookback, self.lookback);

        series
            .bars
            .iter()
            .zip(highest.into_iter().zip(lowest))
            .map(|(bar, range)| match range {
                (Some(high), Some(low)) => {
                    Some((bar.close - low) / (high - low + T_SCORE_EPSILON) * 100.0)
                }
                _ => None,
            })
            .collect()
    }
}

/// Composite trend/volume score: one point per satisfied condition.
///
/// A condition whose inputs are not yet defined on a row scores 0 on that
/// row, so the score itself is always defined.
#[derive(Debug, Clone, Copy, Default)]
pub struct FScore;

impl FScore {
    pub const MAX: u8 = 9;

    pub fn calculate(&self, series: &BarSeries) -> Vec<u8> {
        let closes = series.closes();
        let volumes = series.volumes();

        let ma_10 = window::sma(&closes, 10);
        let ma_20 = window::sma(&closes, 20);
        let ma_50 = window::sma(&closes, 50);
        let ma_200 = window::sma(&closes, 200);
        let ma_50_20_ago: Vec<Option<f64>> = window::shift(&ma_50, 20)
            .into_iter()
            .map(Option::flatten)
            .collect();
        let close_20_ago = window::shift(&closes, 20);
        let avg_volume = window::sma(&volumes, 50);
        let returns_5 = window::pct_change(&closes, 5);
        let returns_20 = window::pct_change(&closes, 20);

        (0..closes.len())
            .map(|i| {
                let close = Some(closes[i]);
                let conditions: [bool; Self::MAX as usize] = [
                    greater(close, ma_50[i]),
                    greater(close, close_20_ago[i]),
                    greater(ma_50[i], ma_50_20_ago[i]),
                    greater(Some(volumes[i]), avg_volume[i]),
                    greater(ma_10[i], ma_20[i]),
                    greater(ma_20[i], ma_50[i]),
                    greater(close, ma_200[i]),
                    greater(returns_5[i], Some(0.0)),
                    greater(returns_20[i], Some(0.0)),
                ];
                conditions.iter().filter(|&&met| met).count() as u8
            })
            .collect()
    }
}
