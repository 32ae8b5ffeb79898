use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::window;
use crate::model::{BarSeries, ExtremumFlags};

/// 52-week and all-time high/low flags.
///
/// Both comparisons include the current row, so a bar that sets a new extreme
/// flags itself. The 52-week window accepts any history from the first row on,
/// up to `week52_days` rows.
#[derive(Debug, Clone)]
pub struct Extremes {
    week52_days: usize,
}

impl Extremes {
    pub fn new(week52_days: usize) -> Result<Self, Report<IndicatorError>> {
        if week52_days == 0 {
            bail!(IndicatorError::InvalidParameter {
                name: "week52_days must be > 0".into(),
            });
        }
        Ok(Self { week52_days })
    }

    pub fn calculate(&self, series: &BarSeries) -> Vec<ExtremumFlags> {
        let highs = series.highs();
        let lows = series.lows();

        let year_high = window::rolling_max(&highs, self.week52_days, 1);
        let year_low = window::rolling_min(&lows, self.week52_days, 1);
        let ever_high = window::expanding_max(&highs);
        let ever_low = window::expanding_min(&lows);

        (0..highs.len())
            .map(|i| ExtremumFlags {
                is_52_week_high: year_high[i].is_some_and(|m| highs[i] >= m),
                is_52_week_low: year_low[i].is_some_and(|m| lows[i] <= m),
                is_all_time_high: highs[i] >= ever_high[i],
                is_all_time_low: lows[i] <= ever_low[i],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bar;
    use chrono::NaiveDate;

    fn series(highs: &[f64], lows: &[f64]) -> BarSeries {
        let start = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        let bars = highs
            .iter()
            .zip(lows)
            .enumerate()
            .map(|(i, (&high, &low))| Bar {
                symbol: "TEST".into(),
                date: start + chrono::Duration::days(i as i64),
                open: low,
                high,
                low,
                close: high,
                volume: 1.0,
            })
            .collect();
        BarSeries::new("TEST", bars)
    }

    #[test]
    fn week52_days_zero_invalid() {
        assert!(Extremes::new(0).is_err());
    }

    #[test]
    fn first_row_is_every_extreme() {
        let bars = series(&[10.0], &[9.0]);
        let flags = Extremes::new(252).unwrap().calculate(&bars);
        assert_eq!(
            flags[0],
            ExtremumFlags {
                is_52_week_high: true,
                is_52_week_low: true,
                is_all_time_high: true,
                is_all_time_low: true,
            }
        );
    }

    #[test]
    fn unique_maximum_flags_itself_only() {
        let highs = [5.0, 6.0, 9.0, 7.0, 8.0];
        let lows = [4.0, 5.0, 6.0, 6.0, 7.0];
        let flags = Extremes::new(252).unwrap().calculate(&series(&highs, &lows));
        let ath: Vec<bool> = flags.iter().map(|f| f.is_all_time_high).collect();
        assert_eq!(ath, vec![true, true, true, false, false]);
    }

    #[test]
    fn old_high_rolls_out_of_52_week_window() {
        // window of 3: the 9.0 leaves the window on row 4
        let highs = [9.0, 5.0, 6.0, 7.0];
        let lows = [1.0, 2.0, 3.0, 4.0];
        let flags = Extremes::new(3).unwrap().calculate(&series(&highs, &lows));
        let year_high: Vec<bool> = flags.iter().map(|f| f.is_52_week_high).collect();
        let ath: Vec<bool> = flags.iter().map(|f| f.is_all_time_high).collect();
        assert_eq!(year_high, vec![true, false, false, true]);
        assert_eq!(ath, vec![true, false, false, false]);
    }

    #[test]
    fn old_low_rolls_out_of_52_week_window() {
        // window of 3: the 1.0 leaves the window on row 4
        let highs = [10.0, 10.0, 10.0, 10.0];
        let lows = [1.0, 5.0, 4.0, 3.0];
        let flags = Extremes::new(3).unwrap().calculate(&series(&highs, &lows));
        let year_low: Vec<bool> = flags.iter().map(|f| f.is_52_week_low).collect();
        let atl: Vec<bool> = flags.iter().map(|f| f.is_all_time_low).collect();
        assert_eq!(year_low, vec![true, false, false, true]);
        assert_eq!(atl, vec![true, false, false, false]);
    }

    #[test]
    fn equal_low_counts_as_new_low() {
        let flags = Extremes::new(252)
            .unwrap()
            .calculate(&series(&[10.0, 10.0], &[8.0, 8.0]));
        assert!(flags[1].is_all_time_low);
        assert!(flags[1].is_52_week_low);
    }
}
