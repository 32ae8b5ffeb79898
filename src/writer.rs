use error_stack::Report;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::model::IndicatorRow;
use crate::storage::{Store, StoreTransaction};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Writes indicator rows to a [`Store`] in batches.
///
/// All batches of one call share a single store transaction: a failed or
/// cancelled write leaves the store exactly as it was before the call.
#[derive(Debug, Clone)]
pub struct UpsertWriter {
    batch_size: usize,
}

impl Default for UpsertWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl UpsertWriter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub async fn write(
        &self,
        store: &dyn Store,
        rows: &[IndicatorRow],
        cancel: &CancellationToken,
    ) -> Result<u64, Report<StorageError>> {
        if rows.is_empty() {
            return Ok(0);
        }

        let total = rows.len();
        let batches = total.div_ceil(self.batch_size);
        info!(rows = total, batches, "storing indicator rows");

        let mut tx = store.begin().await?;
        let mut written = 0u64;
        let mut processed = 0usize;

        for (index, batch) in rows.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                abort(tx).await;
                let stopped = format!("stopped before batch {}/{batches}", index + 1);
                return Err(Report::new(StorageError::Cancelled).attach(stopped));
            }

            match tx.upsert_batch(batch).await {
                Ok(n) => written += n,
                Err(report) => {
                    abort(tx).await;
                    return Err(report.attach(format!("batch {}/{batches}", index + 1)));
                }
            }

            processed += batch.len();
            info!(progress = %format!("{processed}/{total}"), "batch stored");
        }

        tx.commit().await?;
        info!(rows = written, "stored/updated indicator rows");
        Ok(written)
    }
}

async fn abort(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = ?e, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bar, ExtremumFlags, PeriodValues};
    use crate::storage::sqlite::SqliteStore;
    use chrono::NaiveDate;

    fn row(symbol: &str, offset: i64, close: f64) -> IndicatorRow {
        IndicatorRow {
            bar: Bar {
                symbol: symbol.into(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            },
            t_score: None,
            f_score: 0,
            dma: PeriodValues::default(),
            ema: PeriodValues::default(),
            flags: ExtremumFlags::default(),
        }
    }

    fn rows(symbol: &str, n: i64) -> Vec<IndicatorRow> {
        (0..n).map(|i| row(symbol, i, 100.0 + i as f64)).collect()
    }

    #[tokio::test]
    async fn writes_all_rows_across_batches() {
        let store = SqliteStore::in_memory().await;
        let writer = UpsertWriter::new(3);
        let written = writer
            .write(&store, &rows("TCS", 10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(store.count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let store = SqliteStore::in_memory().await;
        let written = UpsertWriter::default()
            .write(&store, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn repeated_write_is_idempotent() {
        let store = SqliteStore::in_memory().await;
        let writer = UpsertWriter::new(4);
        let input = rows("INFY", 9);
        let cancel = CancellationToken::new();

        writer.write(&store, &input, &cancel).await.unwrap();
        let first = store.rows_for_symbol("INFY").await.unwrap();
        writer.write(&store, &input, &cancel).await.unwrap();
        let second = store.rows_for_symbol("INFY").await.unwrap();

        assert_eq!(store.count().await.unwrap(), 9);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn flag_can_shrink_on_rewrite() {
        let store = SqliteStore::in_memory().await;
        let writer = UpsertWriter::default();
        let cancel = CancellationToken::new();

        let mut flagged = row("TCS", 0, 10.0);
        flagged.flags.is_all_time_high = true;
        flagged.t_score = Some(80.0);
        writer.write(&store, &[flagged.clone()], &cancel).await.unwrap();

        let mut cleared = flagged;
        cleared.flags.is_all_time_high = false;
        cleared.t_score = None;
        writer.write(&store, &[cleared], &cancel).await.unwrap();

        let stored = store.rows_for_symbol("TCS").await.unwrap();
        assert!(!stored[0].flags.is_all_time_high);
        assert_eq!(stored[0].t_score, None);
    }

    #[tokio::test]
    async fn failure_mid_write_persists_nothing() {
        let store = SqliteStore::in_memory().await;
        let writer = UpsertWriter::new(2);

        // second batch holds a row the NOT NULL constraint rejects
        let mut input = rows("HDFCBANK", 5);
        input[3].bar.open = f64::NAN;

        let cancel = CancellationToken::new();
        let result = writer.write(&store, &input, &cancel).await;
        assert!(result.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_leaves_previous_state_untouched() {
        let store = SqliteStore::in_memory().await;
        let writer = UpsertWriter::new(2);
        let cancel = CancellationToken::new();
        let original = rows("TCS", 4);
        writer.write(&store, &original, &cancel).await.unwrap();

        let mut update: Vec<IndicatorRow> = original
            .iter()
            .map(|r| {
                let mut r = r.clone();
                r.bar.close += 50.0;
                r
            })
            .collect();
        update[3].bar.high = f64::NAN;
        assert!(writer.write(&store, &update, &cancel).await.is_err());

        let stored = store.rows_for_symbol("TCS").await.unwrap();
        let closes: Vec<f64> = stored.iter().map(|r| r.bar.close).collect();
        assert_eq!(closes, vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[tokio::test]
    async fn cancelled_write_persists_nothing() {
        let store = SqliteStore::in_memory().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = UpsertWriter::new(2)
            .write(&store, &rows("TCS", 4), &cancel)
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err.current_context(), StorageError::Cancelled));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
