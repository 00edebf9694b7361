use std::{fs::File, path::PathBuf, time::SystemTime};

use aquabill_core::domain::UsageReading;
use csv::StringRecord;
use futures::Stream;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, IngestError, Source};

/// CSV backfill source for flow readings.
///
/// Expected header columns (by name):
/// - recorded_at (RFC3339 timestamp)
/// - account_id
/// - meter_id (optional)
/// - liters
/// - flow_rate_lpm (optional)
/// - source_system (optional)
///
/// A row that fails to parse is skipped with a counter and a warning rather
/// than aborting the rest of the file; backfill exports routinely carry a few
/// mangled lines.
pub struct ReadingsCsvFileSource {
    path: PathBuf,
}

impl ReadingsCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional_f64(s: &str) -> Option<f64> {
    if s.trim().is_empty() {
        None
    } else {
        s.parse().ok()
    }
}

fn parse_optional_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<UsageReading, IngestError> {
    let get = |name: &str| -> Result<&str, IngestError> {
        headers
            .iter()
            .position(|h| h == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| IngestError::Source(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = get("recorded_at")?;
    let recorded_at = OffsetDateTime::parse(ts_str.trim(), &time::format_description::well_known::Rfc3339)
        .map_err(|e| IngestError::Source(format!("invalid recorded_at '{ts_str}': {e}")))?;

    let account_id = get("account_id")?.trim().to_string();
    if account_id.is_empty() {
        return Err(IngestError::Source("empty account_id in CSV record".to_string()));
    }

    let liters_str = get("liters")?;
    let liters: f64 = liters_str
        .trim()
        .parse()
        .map_err(|e| IngestError::Source(format!("invalid liters '{liters_str}': {e}")))?;

    let meter_id = get("meter_id").ok().map(parse_optional_string).unwrap_or(None);
    let flow_rate_lpm = get("flow_rate_lpm").ok().and_then(parse_optional_f64);
    let source_system = get("source_system").ok().map(parse_optional_string).unwrap_or(None);

    Ok(UsageReading {
        recorded_at,
        account_id,
        meter_id,
        liters,
        flow_rate_lpm,
        source_system,
    })
}

#[async_trait::async_trait]
impl Source for ReadingsCsvFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope, IngestError>> + Send>> {
        // Blocking CSV reader wrapped in a single async task; backfill files
        // are read once and offline.
        let path = self.path.clone();
        let s = async_stream::try_stream! {
            let file = File::open(&path)
                .map_err(|e| IngestError::Source(format!("failed to open CSV file: {e}")))?;
            let mut rdr = csv::Reader::from_reader(file);
            let headers = rdr
                .headers()
                .map_err(|e| IngestError::Source(format!("failed to read CSV headers: {e}")))?
                .clone();

            for result in rdr.records() {
                let record = result.map_err(|e| IngestError::Source(format!(
                    "failed to read CSV record: {e}"
                )))?;

                match record_to_reading(&record, &headers) {
                    Ok(reading) => {
                        yield Envelope {
                            reading,
                            received_at: SystemTime::now(),
                        };
                    }
                    Err(e) => {
                        metrics::counter!("flow_csv_parse_errors_total").increment(1);
                        tracing::warn!(error = %e, "skipping malformed CSV reading");
                    }
                }
            }
        };

        Box::pin(s)
    }
}
