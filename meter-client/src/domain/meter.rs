use sqlx::{postgres::PgRow, Row};
use time::Date;

#[cfg(feature = "serde")]
time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MeterValidationError {
    #[error("{0} must not be blank")]
    BlankField(&'static str),
    #[error("{0} must be a finite number")]
    NonFiniteCoordinate(&'static str),
}

/// A fixed monitoring point.
///
/// The id is structured as `<building>-<block>-<wing>` (e.g. `ENG-B1-WA`) and
/// is the only link between a meter and the hierarchy it is reported under.
/// Fields are private so a `Meter` with blank identity fields cannot be built
/// outside of [`Meter::new`]; rows loaded from the database go through it too.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Meter {
    meter_id: String,
    building: String,
    block: String,
    wing: String,
    latitude: f64,
    longitude: f64,
    #[cfg_attr(feature = "serde", serde(with = "iso_date"))]
    installed_date: Date,
}

fn require(name: &'static str, value: String) -> Result<String, MeterValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MeterValidationError::BlankField(name));
    }
    Ok(trimmed.to_string())
}

impl Meter {
    pub fn new(
        meter_id: impl Into<String>,
        building: impl Into<String>,
        block: impl Into<String>,
        wing: impl Into<String>,
        latitude: f64,
        longitude: f64,
        installed_date: Date,
    ) -> Result<Self, MeterValidationError> {
        if !latitude.is_finite() {
            return Err(MeterValidationError::NonFiniteCoordinate("latitude"));
        }
        if !longitude.is_finite() {
            return Err(MeterValidationError::NonFiniteCoordinate("longitude"));
        }

        Ok(Self {
            meter_id: require("meter_id", meter_id.into())?,
            building: require("building", building.into())?,
            block: require("block", block.into())?,
            wing: require("wing", wing.into())?,
            latitude,
            longitude,
            installed_date,
        })
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    pub fn building(&self) -> &str {
        &self.building
    }

    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn wing(&self) -> &str {
        &self.wing
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn installed_date(&self) -> Date {
        self.installed_date
    }
}

/// Stored rows are re-validated; a blank identity column fails the decode.
fn from_columns(
    meter_id: String,
    building: String,
    block: String,
    wing: String,
    latitude: f64,
    longitude: f64,
    installed_date: Date,
) -> Result<Meter, sqlx::Error> {
    Meter::new(meter_id, building, block, wing, latitude, longitude, installed_date)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl<'r> sqlx::FromRow<'r, PgRow> for Meter {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        from_columns(
            row.try_get("meter_id")?,
            row.try_get("building")?,
            row.try_get("block")?,
            row.try_get("wing")?,
            row.try_get("latitude")?,
            row.try_get("longitude")?,
            row.try_get("installed_date")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn new_meter_keeps_identity_fields() {
        let m = Meter::new(
            "ENG-B1-WA",
            "Engineering Block",
            "1",
            "A",
            -1.2921,
            36.8219,
            date!(2023 - 05 - 10),
        )
        .unwrap();

        assert_eq!(m.meter_id(), "ENG-B1-WA");
        assert_eq!(m.building(), "Engineering Block");
        assert_eq!(m.block(), "1");
        assert_eq!(m.wing(), "A");
        assert_eq!(m.installed_date(), date!(2023 - 05 - 10));
    }

    #[test]
    fn blank_identity_fields_are_rejected() {
        let res = Meter::new("ENG-B1-WA", "  ", "1", "A", 0.0, 0.0, date!(2023 - 05 - 10));
        assert_eq!(res, Err(MeterValidationError::BlankField("building")));

        let res = Meter::new("", "Library", "1", "A", 0.0, 0.0, date!(2023 - 05 - 10));
        assert_eq!(res, Err(MeterValidationError::BlankField("meter_id")));

        let res = Meter::new("LIB-B1-WC", "Library", "1", "\t", 0.0, 0.0, date!(2023 - 05 - 10));
        assert_eq!(res, Err(MeterValidationError::BlankField("wing")));
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let res = Meter::new("LIB-B1-WC", "Library", "1", "C", f64::NAN, 0.0, date!(2021 - 03 - 02));
        assert_eq!(res, Err(MeterValidationError::NonFiniteCoordinate("latitude")));
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let m = Meter::new(" SCI-B2-WB ", "Science Complex", "2", "B", 0.0, 0.0, date!(2022 - 09 - 18))
            .unwrap();
        assert_eq!(m.meter_id(), "SCI-B2-WB");
    }

    #[test]
    fn stored_rows_with_blank_identity_fail_to_decode() {
        let res = from_columns(
            "LIB-B3-WC".to_string(),
            "Library".to_string(),
            "   ".to_string(),
            "C".to_string(),
            -1.2927,
            36.8226,
            date!(2021 - 03 - 02),
        );
        match res {
            Err(sqlx::Error::Decode(e)) => assert_eq!(e.to_string(), "block must not be blank"),
            other => panic!("expected a decode error, got {other:?}"),
        }

        let ok = from_columns(
            "LIB-B3-WC".to_string(),
            "Library".to_string(),
            "1".to_string(),
            "C".to_string(),
            -1.2927,
            36.8226,
            date!(2021 - 03 - 02),
        )
        .unwrap();
        assert_eq!(ok.block(), "1");
    }
}
