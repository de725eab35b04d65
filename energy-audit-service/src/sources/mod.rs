pub mod http_json;
pub mod reading_csv_file;
pub mod simulated;

pub use http_json::ReadingFeedSource;
pub use reading_csv_file::ReadingCsvFileSource;
pub use simulated::{ReadingSensor, SimulatedSensor, SimulatedSource};
