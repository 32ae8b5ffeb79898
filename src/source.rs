pub mod yahoo;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SourceError;
use crate::model::BarSeries;

/// Provider of daily OHLCV history.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn BarSource`).
pub trait BarSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch up to `bar_count` most recent daily bars of `symbol` listed on
    /// `exchange`, ascending by date with one bar per date.
    ///
    /// `Ok(None)` means the provider has no data for the symbol; errors are
    /// reserved for transport and decoding failures.
    fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        bar_count: usize,
    ) -> BoxFuture<'_, Result<Option<BarSeries>, Report<SourceError>>>;
}
