use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::model::{Bar, BarSeries};
use crate::source::BarSource;

const SOURCE_NAME: &str = "yahoo";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) equity-indicators";
const SECONDS_PER_DAY: i64 = 86_400;

/// Daily bars from the Yahoo Finance v8 chart endpoint.
pub struct YahooSource {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl YahooSource {
    pub fn new(config: &SourceConfig) -> Result<Self, Report<SourceError>> {
        let rps = NonZeroU32::new(config.requests_per_second)
            .unwrap_or(nonzero!(1u32));
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .change_context(request_error())?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        })
    }
}

impl BarSource for YahooSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn fetch(
        &self,
        symbol: &str,
        exchange: &str,
        bar_count: usize,
    ) -> BoxFuture<'_, Result<Option<BarSeries>, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        let ticker = ticker_for(&symbol, exchange);
        Box::pin(async move {
            if bar_count == 0 {
                return Ok(None);
            }

            self.rate_limiter.until_ready().await;

            let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
            let period2 = Utc::now().timestamp();
            let period1 = period2 - window_days(bar_count) * SECONDS_PER_DAY;
            let period1 = period1.to_string();
            let period2 = period2.to_string();
            let params = [
                ("period1", period1.as_str()),
                ("period2", period2.as_str()),
                ("interval", "1d"),
                ("events", "history"),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(request_error())
                .attach_with(|| format!("ticker: {ticker}"))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                debug!(symbol = %symbol, ticker = %ticker, "symbol unknown to source");
                return Ok(None);
            }
            if !status.is_success() {
                return Err(Report::new(request_error())
                    .attach(format!("HTTP status: {status}"))
                    .attach(format!("ticker: {ticker}")));
            }

            let chart: ChartResponse = response
                .json()
                .await
                .change_context(SourceError::ResponseParse {
                    source_name: SOURCE_NAME.into(),
                })
                .attach_with(|| format!("ticker: {ticker}"))?;

            let series = chart.into_series(&symbol, bar_count)?;
            info!(
                symbol = %symbol,
                ticker = %ticker,
                fetched = series.as_ref().map_or(0, BarSeries::len),
                "yahoo bar fetch complete"
            );
            Ok(series)
        })
    }
}

fn request_error() -> SourceError {
    SourceError::Request {
        source_name: SOURCE_NAME.into(),
    }
}

/// Provider ticker for a symbol on an exchange.
pub fn ticker_for(symbol: &str, exchange: &str) -> String {
    match exchange.to_ascii_uppercase().as_str() {
        "NSE" => format!("{symbol}.NS"),
        "BSE" => format!("{symbol}.BO"),
        _ => symbol.to_owned(),
    }
}

/// Calendar days to request so that `bar_count` trading days fit, allowing for
/// weekends, exchange holidays and a month of slack.
fn window_days(bar_count: usize) -> i64 {
    (bar_count as i64) * 3 / 2 + 30
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResponse {
    fn into_series(
        self,
        symbol: &str,
        bar_count: usize,
    ) -> Result<Option<BarSeries>, Report<SourceError>> {
        let Some(result) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(None);
        };
        let offset = result.meta.gmtoffset;
        let Some(quote) = result.indicators.quote.into_iter().next() else {
            return Ok(None);
        };

        // BTreeMap keeps dates ascending and the last row for a repeated date.
        let mut by_date: BTreeMap<NaiveDate, Bar> = BTreeMap::new();
        for (i, &ts) in result.timestamp.iter().enumerate() {
            let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
                at(&quote.open, i),
                at(&quote.high, i),
                at(&quote.low, i),
                at(&quote.close, i),
                at(&quote.volume, i),
            ) else {
                continue;
            };

            let date = local_date(ts, offset).ok_or_else(|| {
                Report::new(SourceError::ResponseParse {
                    source_name: SOURCE_NAME.into(),
                })
                .attach(format!("timestamp out of range: {ts}"))
            })?;

            by_date.insert(
                date,
                Bar {
                    symbol: symbol.to_owned(),
                    date,
                    open,
                    high,
                    low,
                    close,
                    volume,
                },
            );
        }

        if by_date.is_empty() {
            return Ok(None);
        }

        let skip = by_date.len().saturating_sub(bar_count);
        let bars: Vec<Bar> = by_date.into_values().skip(skip).collect();
        Ok(Some(BarSeries::new(symbol, bars)))
    }
}

fn at(column: &[Option<f64>], i: usize) -> Option<f64> {
    column.get(i).copied().flatten()
}

fn local_date(timestamp: i64, gmtoffset: i64) -> Option<NaiveDate> {
    let local = timestamp.checked_add(gmtoffset)?;
    DateTime::from_timestamp(local, 0).map(|dt| dt.date_naive())
}
