use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Hard failure from a bar source. "No data" is not an error and is reported
/// as `Ok(None)` by sources instead.
#[derive(Debug, Display, Error)]
pub enum SourceError {
    #[display("request to {source_name} failed")]
    Request { source_name: String },
    #[display("failed to parse response from {source_name}")]
    ResponseParse { source_name: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to upsert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("write cancelled")]
    Cancelled,
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
    #[display("malformed series for {symbol}: {reason}")]
    MalformedSeries { symbol: String, reason: String },
    #[display("indicator worker for {symbol} failed")]
    Worker { symbol: String },
}

#[derive(Debug, Display, Error)]
pub enum PipelineError {
    #[display("failed to store indicator rows")]
    Storage,
    #[display("run cancelled")]
    Cancelled,
}
