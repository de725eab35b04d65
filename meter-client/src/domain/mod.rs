mod aggregated_reading;
mod meter;
mod reading;

pub use aggregated_reading::{AggregatedReading, ChartStats};
pub use meter::{Meter, MeterValidationError};
pub use reading::{NewReading, Reading};
