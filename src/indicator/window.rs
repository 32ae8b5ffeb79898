//! Rolling and expanding statistics over date-ordered `f64` series.
//!
//! Every function returns one entry per input element. `None` marks a row
//! whose window is not full yet; values are never approximated from a partial
//! window unless a smaller `min_periods` is asked for explicitly.

/// Simple moving average over a full trailing window of `period` values.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, period, |w| {
        w.iter().sum::<f64>() / period as f64
    })
}

/// Exponential moving average with `alpha = 2 / (period + 1)`.
///
/// The first defined value (index `period - 1`) is the plain mean of the first
/// `period` values; later values follow the unadjusted recursion
/// `ema[i] = alpha * x[i] + (1 - alpha) * ema[i - 1]`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for (i, &x) in values.iter().enumerate().skip(period) {
        prev = alpha * x + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Maximum over the trailing `period` values. Rows with fewer than
/// `min_periods` values available are `None`; between `min_periods` and
/// `period` the shorter window is used.
pub fn rolling_max(values: &[f64], period: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling(values, period, min_periods, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Minimum counterpart of [`rolling_max`].
pub fn rolling_min(values: &[f64], period: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling(values, period, min_periods, |w| {
        w.iter().copied().fold(f64::INFINITY, f64::min)
    })
}

/// Running maximum from the first row through each row, inclusive.
pub fn expanding_max(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(f64::NEG_INFINITY, |acc, &x| {
            *acc = acc.max(x);
            Some(*acc)
        })
        .collect()
}

/// Running minimum from the first row through each row, inclusive.
pub fn expanding_min(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(f64::INFINITY, |acc, &x| {
            *acc = acc.min(x);
            Some(*acc)
        })
        .collect()
}

/// `x[i] / x[i - k] - 1`, undefined for the first `k` rows.
pub fn pct_change(values: &[f64], k: usize) -> Vec<Option<f64>> {
    shift(values, k)
        .into_iter()
        .zip(values)
        .map(|(prev, &x)| prev.map(|p| x / p - 1.0))
        .collect()
}

/// Value `k` rows back, undefined for the first `k` rows.
pub fn shift<T: Copy>(values: &[T], k: usize) -> Vec<Option<T>> {
    (0..values.len())
        .map(|i| i.checked_sub(k).map(|j| values[j]))
        .collect()
}

/// `a > b` where either side may be undefined; an undefined side is `false`.
pub fn greater(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

fn rolling<F>(values: &[f64], period: usize, min_periods: usize, stat: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    if period == 0 {
        return vec![None; values.len()];
    }
    let min_periods = min_periods.clamp(1, period);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            let window = &values[start..=i];
            (window.len() >= min_periods).then(|| stat(window))
        })
        .collect()
}
