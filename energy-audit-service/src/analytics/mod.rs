//! Pure derived views over readings: window statistics, hierarchical
//! rollups, efficiency classification and power-triangle metrics.

pub mod aggregate;
pub mod classify;
pub mod power;
pub mod stats;

pub use aggregate::{aggregate_by_level, group_key, AggregationError, AggregationLevel};
pub use classify::{
    classify, is_inefficient, recommend, Classification, Recommendation, OPTIMAL_RECOMMENDATION,
};
pub use power::{calculate_power_metrics, PowerMetrics};
pub use stats::{compute_stats, peak, ChartWindow};
