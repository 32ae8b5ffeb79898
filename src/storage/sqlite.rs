use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Connection, Row, Sqlite, SqlitePool};

use crate::error::StorageError;
use crate::model::{Bar, ExtremumFlags, IndicatorRow, PeriodValues};
use crate::storage::schema::{
    COLUMNS, ColumnValue, DATE_FORMAT, MA_COLUMN_PERIODS, SELECT_COLUMNS, TABLE, UPSERT_SQL,
};
use crate::storage::{Store, StoreTransaction};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<StorageError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every handle of the pool sees
    /// the same data.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        Self::migrate(pool).await.unwrap()
    }
}

impl Store for SqliteStore {
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn StoreTransaction>, Report<StorageError>>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;
            Ok(Box::new(SqliteTransaction { tx }) as Box<dyn StoreTransaction>)
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<u64, Report<StorageError>>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {TABLE}"))
                .fetch_one(&self.pool)
                .await
                .change_context(StorageError::Query)?;
            Ok(count.max(0) as u64)
        })
    }

    fn distinct_symbols(&self) -> BoxFuture<'_, Result<BTreeSet<String>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String,)> =
                sqlx::query_as(&format!("SELECT DISTINCT symbol FROM {TABLE}"))
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(|(s,)| s).collect())
        })
    }

    fn date_range(
        &self,
    ) -> BoxFuture<'_, Result<Option<(NaiveDate, NaiveDate)>, Report<StorageError>>> {
        Box::pin(async move {
            let (min, max): (Option<String>, Option<String>) =
                sqlx::query_as(&format!("SELECT MIN(date), MAX(date) FROM {TABLE}"))
                    .fetch_one(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            match (min, max) {
                (Some(min), Some(max)) => Ok(Some((parse_date(&min)?, parse_date(&max)?))),
                _ => Ok(None),
            }
        })
    }

    fn rows_for_symbol(
        &self,
        symbol: &str,
    ) -> BoxFuture<'_, Result<Vec<IndicatorRow>, Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let rows: Vec<SqliteRow> = sqlx::query(&format!(
                "SELECT {} FROM {TABLE} WHERE symbol = ? ORDER BY date ASC",
                *SELECT_COLUMNS
            ))
            .bind(&symbol)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.iter()
                .map(map_indicator_row)
                .collect::<Result<Vec<_>, _>>()
        })
    }
}

pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl StoreTransaction for SqliteTransaction {
    fn upsert_batch<'a>(
        &'a mut self,
        rows: &'a [IndicatorRow],
    ) -> BoxFuture<'a, Result<u64, Report<StorageError>>> {
        Box::pin(async move {
            // A savepoint, so a failed batch leaves earlier batches of the
            // same transaction intact.
            let mut savepoint = Connection::begin(&mut *self.tx)
                .await
                .change_context(StorageError::Insert)?;

            let mut written = 0;
            for row in rows {
                let mut query = sqlx::query(UPSERT_SQL.as_str());
                for column in COLUMNS {
                    query = match (column.value)(row) {
                        ColumnValue::Text(v) => query.bind(v),
                        ColumnValue::Real(v) => query.bind(v),
                        ColumnValue::Flag(v) => query.bind(v),
                    };
                }
                written += query
                    .execute(&mut *savepoint)
                    .await
                    .change_context(StorageError::Insert)
                    .attach_with(|| format!("row: {} {}", row.symbol(), row.date()))?
                    .rows_affected();
            }

            savepoint
                .commit()
                .await
                .change_context(StorageError::Insert)?;
            Ok(written)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), Report<StorageError>>> {
        let SqliteTransaction { tx } = *self;
        Box::pin(async move { tx.commit().await.change_context(StorageError::Insert) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), Report<StorageError>>> {
        let SqliteTransaction { tx } = *self;
        Box::pin(async move { tx.rollback().await.change_context(StorageError::Insert) })
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, Report<StorageError>> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .change_context(StorageError::Query)
        .attach_with(|| format!("stored date: {value}"))
}

fn map_indicator_row(row: &SqliteRow) -> Result<IndicatorRow, Report<StorageError>> {
    let real = |name: &str| -> Result<Option<f64>, Report<StorageError>> {
        row.try_get::<Option<f64>, _>(name)
            .change_context(StorageError::Query)
            .attach_with(|| format!("column: {name}"))
    };
    let flag = |name: &str| -> Result<bool, Report<StorageError>> {
        row.try_get::<bool, _>(name)
            .change_context(StorageError::Query)
            .attach_with(|| format!("column: {name}"))
    };
    let periods = |prefix: &str| -> Result<PeriodValues, Report<StorageError>> {
        MA_COLUMN_PERIODS
            .iter()
            .map(|&p| real(&format!("{prefix}_{p}")).map(|v| (p, v)))
            .collect::<Result<Vec<_>, _>>()
            .map(PeriodValues::new)
    };

    let symbol: String = row.try_get("symbol").change_context(StorageError::Query)?;
    let date: String = row.try_get("date").change_context(StorageError::Query)?;

    Ok(IndicatorRow {
        bar: Bar {
            symbol,
            date: parse_date(&date)?,
            open: real("open")?.unwrap_or(f64::NAN),
            high: real("high")?.unwrap_or(f64::NAN),
            low: real("low")?.unwrap_or(f64::NAN),
            close: real("close")?.unwrap_or(f64::NAN),
            volume: real("volume")?.unwrap_or(f64::NAN),
        },
        t_score: real("t_score")?,
        f_score: real("f_score")?.unwrap_or(0.0) as u8,
        dma: periods("dma")?,
        ema: periods("ema")?,
        flags: ExtremumFlags {
            is_52_week_high: flag("is_52_week_high")?,
            is_52_week_low: flag("is_52_week_low")?,
            is_all_time_high: flag("is_all_time_high")?,
            is_all_time_low: flag("is_all_time_low")?,
        },
    })
}
