use meter_client::domain::{Meter, MeterValidationError};
use time::macros::date;

/// Meters installed when the directory starts out empty.
///
/// The stored `block` values are kept as originally surveyed and do not
/// always match the block segment of the id (`LIB-B3-WC` sits in block `1`).
pub fn default_meters() -> Result<Vec<Meter>, MeterValidationError> {
    Ok(vec![
        Meter::new(
            "ENG-B1-WA",
            "Engineering Block",
            "1",
            "A",
            -1.2921,
            36.8219,
            date!(2023 - 05 - 10),
        )?,
        Meter::new(
            "SCI-B2-WB",
            "Science Complex",
            "2",
            "B",
            -1.2924,
            36.8222,
            date!(2022 - 09 - 18),
        )?,
        Meter::new(
            "LIB-B3-WC",
            "Library",
            "1",
            "C",
            -1.2927,
            36.8226,
            date!(2021 - 03 - 02),
        )?,
    ])
}
