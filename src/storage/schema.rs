//! Declarative column layout of the `stock_data` table.
//!
//! `COLUMNS` is the single place that maps an [`IndicatorRow`] onto stored
//! columns. The insert statement and its conflict clause are derived from it,
//! so a new indicator column is added here (plus a migration) and nowhere else
//! on the write path.

use std::sync::LazyLock;

use crate::model::IndicatorRow;

pub const TABLE: &str = "stock_data";

/// Conflict key of the upsert; never overwritten.
pub const KEY_COLUMNS: [&str; 2] = ["symbol", "date"];

/// Periods that have `dma_{p}` / `ema_{p}` columns.
pub const MA_COLUMN_PERIODS: [usize; 4] = [10, 21, 50, 100];

/// Date format of the `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Real(Option<f64>),
    Flag(bool),
}

pub struct Column {
    pub name: &'static str,
    pub value: fn(&IndicatorRow) -> ColumnValue,
}

pub static COLUMNS: &[Column] = &[
    Column {
        name: "symbol",
        value: |r| ColumnValue::Text(r.bar.symbol.clone()),
    },
    Column {
        name: "date",
        value: |r| ColumnValue::Text(r.bar.date.format(DATE_FORMAT).to_string()),
    },
    Column {
        name: "open",
        value: |r| ColumnValue::Real(Some(r.bar.open)),
    },
    Column {
        name: "high",
        value: |r| ColumnValue::Real(Some(r.bar.high)),
    },
    Column {
        name: "low",
        value: |r| ColumnValue::Real(Some(r.bar.low)),
    },
    Column {
        name: "close",
        value: |r| ColumnValue::Real(Some(r.bar.close)),
    },
    Column {
        name: "volume",
        value: |r| ColumnValue::Real(Some(r.bar.volume)),
    },
    Column {
        name: "t_score",
        value: |r| ColumnValue::Real(r.t_score),
    },
    Column {
        name: "f_score",
        value: |r| ColumnValue::Real(Some(f64::from(r.f_score))),
    },
    Column {
        name: "dma_10",
        value: |r| ColumnValue::Real(r.dma.get(10)),
    },
    Column {
        name: "dma_21",
        value: |r| ColumnValue::Real(r.dma.get(21)),
    },
    Column {
        name: "dma_50",
        value: |r| ColumnValue::Real(r.dma.get(50)),
    },
    Column {
        name: "dma_100",
        value: |r| ColumnValue::Real(r.dma.get(100)),
    },
    Column {
        name: "ema_10",
        value: |r| ColumnValue::Real(r.ema.get(10)),
    },
    Column {
        name: "ema_21",
        value: |r| ColumnValue::Real(r.ema.get(21)),
    },
    Column {
        name: "ema_50",
        value: |r| ColumnValue::Real(r.ema.get(50)),
    },
    Column {
        name: "ema_100",
        value: |r| ColumnValue::Real(r.ema.get(100)),
    },
    Column {
        name: "is_52_week_high",
        value: |r| ColumnValue::Flag(r.flags.is_52_week_high),
    },
    Column {
        name: "is_52_week_low",
        value: |r| ColumnValue::Flag(r.flags.is_52_week_low),
    },
    Column {
        name: "is_all_time_high",
        value: |r| ColumnValue::Flag(r.flags.is_all_time_high),
    },
    Column {
        name: "is_all_time_low",
        value: |r| ColumnValue::Flag(r.flags.is_all_time_low),
    },
];

/// Every column that an upsert overwrites on conflict.
pub fn value_columns() -> impl Iterator<Item = &'static Column> {
    COLUMNS.iter().filter(|c| !KEY_COLUMNS.contains(&c.name))
}

/// `INSERT ... ON CONFLICT (symbol, date) DO UPDATE SET <every value column>`.
pub static UPSERT_SQL: LazyLock<String> = LazyLock::new(|| {
    let names: Vec<&str> = COLUMNS.iter().map(|c| c.name).collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    let updates: Vec<String> = value_columns()
        .map(|c| format!("{0} = excluded.{0}", c.name))
        .collect();
    format!(
        "INSERT INTO {TABLE} ({}) VALUES ({placeholders}) ON CONFLICT ({}) DO UPDATE SET {}",
        names.join(", "),
        KEY_COLUMNS.join(", "),
        updates.join(", "),
    )
});

/// Column list for reads, in table order.
pub static SELECT_COLUMNS: LazyLock<String> = LazyLock::new(|| {
    let names: Vec<&str> = COLUMNS.iter().map(|c| c.name).collect();
    names.join(", ")
});
