use aquabill_core::domain::UsageReading;
use time::macros::datetime;

use crate::pipeline::IngestError;

/// Sanitize one reading before it is stored.
///
/// Rules:
/// - recorded_at must fall within a broad sanity window [2000-01-01, 2100-01-01].
/// - negative or non-finite liters clamp to 0 instead of rejecting the reading;
///   the clamp is counted so it stays observable.
pub fn sanitize_reading(mut reading: UsageReading) -> Result<UsageReading, IngestError> {
    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if reading.recorded_at < min_ts || reading.recorded_at > max_ts {
        metrics::counter!("flow_readings_rejected_total").increment(1);
        return Err(IngestError::Validate(
            "recorded_at out of allowed range".to_string(),
        ));
    }

    if !reading.liters.is_finite() || reading.liters < 0.0 {
        metrics::counter!("flow_readings_clamped_total").increment(1);
        reading.liters = 0.0;
    }

    Ok(reading)
}
