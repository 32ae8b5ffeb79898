use std::collections::HashSet;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::storage::schema::MA_COLUMN_PERIODS;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_ma_periods() -> Vec<usize> {
    vec![10, 21, 50, 100]
}

fn default_week52_days() -> usize {
    252
}

fn default_t_score_lookback() -> usize {
    14
}

fn default_exchange() -> String {
    "NSE".into()
}

fn default_lookback_days() -> usize {
    200
}

fn default_fetch_buffer() -> usize {
    200
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_source_base_url() -> String {
    "https://query1.finance.yahoo.com".into()
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

/// Window settings handed to the indicator engine at construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_ma_periods")]
    pub dma_periods: Vec<usize>,
    #[serde(default = "default_ma_periods")]
    pub ema_periods: Vec<usize>,
    #[serde(default = "default_week52_days")]
    pub week52_days: usize,
    #[serde(default = "default_t_score_lookback")]
    pub t_score_lookback: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            dma_periods: default_ma_periods(),
            ema_periods: default_ma_periods(),
            week52_days: default_week52_days(),
            t_score_lookback: default_t_score_lookback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: usize,
    /// Extra bars fetched on top of `lookback_days` so long windows can warm up.
    #[serde(default = "default_fetch_buffer")]
    pub fetch_buffer: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl PipelineConfig {
    /// Number of daily bars requested per symbol.
    pub fn bar_count(&self) -> usize {
        self.lookback_days + self.fetch_buffer
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            symbols: Vec::new(),
            lookback_days: default_lookback_days(),
            fetch_buffer: default_fetch_buffer(),
            batch_size: default_batch_size(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            requests_per_second: default_requests_per_second(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(&config.general)?;
    validate_indicators(&config.indicators)?;
    validate_pipeline(&config.pipeline)?;
    validate_source(&config.source)?;
    Ok(())
}

fn invalid(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn validate_general(general: &GeneralConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&general.log_format.as_str()) {
        return Err(invalid(format!(
            "general.log_format \"{}\" is not one of {VALID_LOG_FORMATS:?}",
            general.log_format
        )));
    }
    Ok(())
}

fn validate_indicators(indicators: &IndicatorConfig) -> Result<(), Report<ConfigError>> {
    for (name, periods) in [
        ("dma_periods", &indicators.dma_periods),
        ("ema_periods", &indicators.ema_periods),
    ] {
        let mut seen = HashSet::new();
        for &period in periods {
            if !MA_COLUMN_PERIODS.contains(&period) {
                let field = format!("indicators.{name}: period {period} has no stored column");
                let allowed = format!("allowed periods: {MA_COLUMN_PERIODS:?}");
                return Err(invalid(field).attach(allowed));
            }
            if !seen.insert(period) {
                let field = format!("indicators.{name}: duplicate period {period}");
                return Err(invalid(field));
            }
        }
    }
    if indicators.week52_days == 0 {
        return Err(invalid("indicators.week52_days must be > 0".into()));
    }
    if indicators.t_score_lookback == 0 {
        return Err(invalid("indicators.t_score_lookback must be > 0".into()));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), Report<ConfigError>> {
    if pipeline.batch_size == 0 {
        return Err(invalid("pipeline.batch_size must be > 0".into()));
    }
    if pipeline.workers == 0 {
        return Err(invalid("pipeline.workers must be > 0".into()));
    }
    let mut seen = HashSet::new();
    for symbol in &pipeline.symbols {
        if symbol.trim().is_empty() {
            return Err(invalid("pipeline.symbols: empty symbol".into()));
        }
        if !seen.insert(symbol.as_str()) {
            let field = format!("pipeline.symbols: duplicate symbol \"{symbol}\"");
            return Err(invalid(field));
        }
    }
    Ok(())
}

fn validate_source(source: &SourceConfig) -> Result<(), Report<ConfigError>> {
    if source.requests_per_second == 0 {
        return Err(invalid("source.requests_per_second must be > 0".into()));
    }
    Ok(())
}
