use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use meter_client::domain::NewReading;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV backfill source for readings.
///
/// Expected header columns (by name):
/// - timestamp (RFC3339)
/// - meter_id
/// - power_kw
/// - voltage
/// - current
///
/// A malformed row is yielded as an error and reading continues; an
/// unreadable file or header ends the stream.
pub struct ReadingCsvFileSource {
    path: PathBuf,
}

impl ReadingCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_measurement(name: &str, raw: &str) -> Result<f64, PipelineError> {
    raw.trim()
        .parse()
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<NewReading, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = get("timestamp")?;
    let timestamp = OffsetDateTime::parse(ts_str.trim(), &time::format_description::well_known::Rfc3339)
        .map_err(|e| PipelineError::Source(format!("invalid timestamp '{ts_str}': {e}")))?;

    Ok(NewReading {
        meter_id: get("meter_id")?.trim().to_string(),
        power_kw: parse_measurement("power_kw", get("power_kw")?)?,
        voltage: parse_measurement("voltage", get("voltage")?)?,
        current: parse_measurement("current", get("current")?)?,
        timestamp,
    })
}

#[async_trait::async_trait]
impl Source<NewReading> for ReadingCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<NewReading> {
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open CSV file: {e}")));
                    return;
                }
            };
            let mut rdr = csv::Reader::from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                let parsed = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_reading(&record, &headers));

                match parsed {
                    Ok(reading) => yield Ok(Envelope::now(reading)),
                    Err(e) => {
                        metrics::counter!("reading_csv_parse_errors_total").increment(1);
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use time::macros::datetime;

    fn write_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.csv", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn rows_become_readings_and_bad_rows_are_skipped() {
        let path = write_csv(
            "energy-audit-readings",
            "timestamp,meter_id,power_kw,voltage,current\n\
             2024-02-01T08:00:00Z,ENG-B1-WA,4.84,220,22\n\
             2024-02-01T08:00:30Z,ENG-B1-WA,not-a-number,220,22\n\
             2024-02-01T08:01:00Z, SCI-B2-WB ,2.3,230,10\n",
        );

        let items: Vec<_> = ReadingCsvFileSource::new(&path).stream().await.collect().await;
        std::fs::remove_file(&path).ok();

        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.payload.meter_id, "ENG-B1-WA");
        assert_eq!(first.payload.timestamp, datetime!(2024-02-01 08:00:00 UTC));
        assert!(matches!(items[1], Err(PipelineError::Source(_))));
        assert_eq!(items[2].as_ref().unwrap().payload.meter_id, "SCI-B2-WB");
    }

    #[tokio::test]
    async fn missing_file_yields_a_single_error() {
        let items: Vec<_> = ReadingCsvFileSource::new("/nonexistent/readings.csv")
            .stream()
            .await
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
