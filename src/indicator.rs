pub mod engine;
pub mod extremum;
pub mod ma;
pub mod score;
pub mod window;

pub use engine::IndicatorEngine;

use crate::model::BarSeries;

/// A per-row numeric indicator over one symbol's series.
///
/// The series must be in ascending date order (oldest first). The output has
/// exactly one entry per bar; rows inside the warm-up period are `None`.
pub trait Indicator: Send + Sync {
    /// Column-style name of this indicator (e.g. `"dma_10"`).
    fn name(&self) -> String;

    fn calculate(&self, series: &BarSeries) -> Vec<Option<f64>>;
}
