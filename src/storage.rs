pub mod schema;
pub mod sqlite;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::IndicatorRow;

/// Durable store of indicator rows, unique on `(symbol, date)`.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn Store`).
pub trait Store: Send + Sync {
    /// Open a unit of work. Nothing written through it is visible to readers
    /// until [`StoreTransaction::commit`] succeeds.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>, Report<StorageError>>>;

    fn count(&self) -> BoxFuture<'_, Result<u64, Report<StorageError>>>;

    fn distinct_symbols(&self) -> BoxFuture<'_, Result<BTreeSet<String>, Report<StorageError>>>;

    /// Earliest and latest stored date, or `None` for an empty store.
    fn date_range(
        &self,
    ) -> BoxFuture<'_, Result<Option<(NaiveDate, NaiveDate)>, Report<StorageError>>>;

    /// Stored rows of one symbol in ascending date order.
    fn rows_for_symbol(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Vec<IndicatorRow>, Report<StorageError>>>;
}

pub trait StoreTransaction: Send {
    /// Insert-or-replace every row keyed by `(symbol, date)`. On conflict all
    /// non-key columns take the new values. The batch applies entirely or not
    /// at all; returns the number of rows written.
    fn upsert_batch<'a>(
        &'a mut self,
        rows: &'a [IndicatorRow],
    ) -> BoxFuture<'a, Result<u64, Report<StorageError>>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), Report<StorageError>>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), Report<StorageError>>>;
}
