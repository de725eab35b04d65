//! Meter registration: turns free-form building/block/wing input into a
//! validated [`Meter`] with a structured `<building>-<block>-<wing>` id.

use meter_client::domain::{Meter, MeterValidationError};
use time::Date;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

const IGNORED_BUILDING_WORDS: [&str; 5] = ["block", "building", "hall", "hostel", "complex"];

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct MeterRegistration {
    pub building: String,
    pub block: String,
    pub wing: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "iso_date")]
    pub installed_date: Date,
}

impl MeterRegistration {
    /// Validate the input and build the meter, generating its id.
    pub fn into_meter(self) -> Result<Meter, MeterValidationError> {
        for (name, value) in [
            ("building", &self.building),
            ("block", &self.block),
            ("wing", &self.wing),
        ] {
            if value.trim().is_empty() {
                return Err(MeterValidationError::BlankField(name));
            }
        }

        let meter_id = generate_meter_id(&self.building, &self.block, &self.wing);
        Meter::new(
            meter_id,
            self.building,
            self.block,
            self.wing,
            self.latitude,
            self.longitude,
            self.installed_date,
        )
    }
}

/// Short building code: `"Engineering Block"` → `ENG`, `"Main Lecture Hall 2"`
/// → `ML2`.
///
/// Generic words (block, building, hall, hostel, complex) are dropped. A
/// single remaining word gives its first three letters plus any digits it
/// contains; several words give the initial of each followed by that word's
/// digits.
pub fn abbreviate_building_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let words: Vec<&str> = lowered
        .split([' ', '-'])
        .filter(|w| !w.trim().is_empty() && !IGNORED_BUILDING_WORDS.contains(w))
        .collect();

    match words.as_slice() {
        [] => name.chars().take(3).collect::<String>().to_uppercase(),
        [word] => {
            let letters: String = word
                .chars()
                .take_while(|c| c.is_alphabetic())
                .take(3)
                .collect();
            let digits: String = word
                .chars()
                .skip_while(|c| c.is_alphabetic())
                .filter(|c| c.is_ascii_digit())
                .collect();
            letters.to_uppercase() + &digits
        }
        _ => words
            .iter()
            .map(|word| {
                let mut chars = word.chars();
                let initial: String = chars.next().map(|c| c.to_uppercase().collect()).unwrap_or_default();
                let digits: String = chars.filter(|c| c.is_ascii_digit()).collect();
                initial + &digits
            })
            .collect(),
    }
}

fn normalize_segment(input: &str, prefix: char) -> String {
    let cleaned = input.trim().to_uppercase();

    let all_digits = !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit());
    let short_letters =
        (1..=2).contains(&cleaned.chars().count()) && cleaned.chars().all(|c| c.is_ascii_uppercase());

    if all_digits || short_letters {
        format!("{prefix}{cleaned}")
    } else {
        cleaned.chars().take(2).collect()
    }
}

/// `"1"` → `B1`, `"a"` → `BA`, anything else keeps its first two characters.
pub fn normalize_block_input(input: &str) -> String {
    normalize_segment(input, 'B')
}

/// `"2"` → `W2`, `"b"` → `WB`; `WA`/`WB`/`WC` are kept as typed.
pub fn normalize_wing_input(input: &str) -> String {
    let cleaned = input.trim().to_uppercase();
    if matches!(cleaned.as_str(), "WA" | "WB" | "WC") {
        return cleaned;
    }
    normalize_segment(&cleaned, 'W')
}

pub fn generate_meter_id(building: &str, block: &str, wing: &str) -> String {
    [
        abbreviate_building_name(building),
        normalize_block_input(block),
        normalize_wing_input(wing),
    ]
    .join("-")
}
