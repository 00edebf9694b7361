//! Usage aggregation over daily, weekly and monthly windows.
//!
//! Everything here is a pure computation over an in-memory slice of samples:
//! no I/O, no clock access, and the input is never mutated. Callers inject
//! the reference instant so behaviour is reproducible in tests.

use time::{format_description::well_known::Rfc3339, Date, Duration, Month, OffsetDateTime, Time, UtcOffset};

use crate::billing;
use crate::domain::{RawReading, UsageReading};

/// Charting/billing window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

/// A cleaned usage sample ready for bucketing. `liters` is always finite and
/// non-negative once a sample has passed through [`clean_readings`] or
/// [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub recorded_at: OffsetDateTime,
    pub liters: f64,
}

/// A malformed input that was clamped or excluded during cleaning. Returned
/// rather than logged so callers and tests can assert on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadingWarning {
    #[error("reading {index}: unparseable timestamp '{raw}', sample excluded")]
    BadTimestamp { index: usize, raw: String },
    #[error("reading {index}: negative liters {liters} clamped to 0")]
    ClampedNegative { index: usize, liters: f64 },
    #[error("reading {index}: non-finite liters clamped to 0")]
    ClampedNonFinite { index: usize },
}

/// One chart bucket: the current-period total, the same bucket one period
/// earlier, and a display-only charge for the current total.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub current_liters: f64,
    pub previous_liters: f64,
    pub current_amount: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UsageChart {
    pub period: Period,
    pub points: Vec<ChartPoint>,
}

/// Parse and clamp raw samples. Unparseable timestamps exclude the sample;
/// negative or non-finite liters clamp to 0. Never fails.
pub fn clean_readings(raw: &[RawReading]) -> (Vec<Sample>, Vec<ReadingWarning>) {
    let mut samples = Vec::with_capacity(raw.len());
    let mut warnings = Vec::new();

    for (index, r) in raw.iter().enumerate() {
        let recorded_at = match OffsetDateTime::parse(r.recorded_at.trim(), &Rfc3339) {
            Ok(ts) => ts,
            Err(_) => {
                warnings.push(ReadingWarning::BadTimestamp {
                    index,
                    raw: r.recorded_at.clone(),
                });
                continue;
            }
        };
        let liters = clamp_liters(index, r.liters, &mut warnings);
        samples.push(Sample { recorded_at, liters });
    }

    (samples, warnings)
}

/// Clamp already-typed readings fetched from storage. Timestamps are trusted
/// here; only the liters value can be out of range.
pub fn sanitize(readings: &[UsageReading]) -> (Vec<Sample>, Vec<ReadingWarning>) {
    let mut warnings = Vec::new();
    let samples = readings
        .iter()
        .enumerate()
        .map(|(index, r)| Sample {
            recorded_at: r.recorded_at,
            liters: clamp_liters(index, r.liters, &mut warnings),
        })
        .collect();
    (samples, warnings)
}

fn clamp_liters(index: usize, liters: f64, warnings: &mut Vec<ReadingWarning>) -> f64 {
    if !liters.is_finite() {
        warnings.push(ReadingWarning::ClampedNonFinite { index });
        0.0
    } else if liters < 0.0 {
        warnings.push(ReadingWarning::ClampedNegative { index, liters });
        0.0
    } else {
        liters
    }
}

/// Bucket samples into the selected period's chart series.
///
/// Bucket counts are fixed by the calendar, not the data: 12 two-hour slots
/// for daily, 7 weekdays for weekly, `days_in_month(reference)` for monthly.
/// Buckets with no samples report 0. All intervals are half-open `[start, end)`
/// in UTC.
pub fn usage_chart(samples: &[Sample], period: Period, reference: OffsetDateTime) -> UsageChart {
    let points = match period {
        Period::Daily => daily_points(samples, reference),
        Period::Weekly => weekly_points(samples, reference),
        Period::Monthly => monthly_points(samples, reference),
    };
    UsageChart { period, points }
}

/// Total liters for the calendar day (UTC) of the most recent sample, or 0
/// for empty input. Anchored to the data rather than the wall clock so stale
/// or backfilled feeds still show their last active day.
pub fn current_cycle_liters(samples: &[Sample]) -> f64 {
    let Some(latest) = samples.iter().max_by_key(|s| s.recorded_at) else {
        return 0.0;
    };
    let day = utc_day(latest.recorded_at);
    samples
        .iter()
        .filter(|s| utc_day(s.recorded_at) == day)
        .map(|s| s.liters)
        .sum()
}

/// Total liters recorded within one calendar month (UTC).
pub fn month_liters(samples: &[Sample], year: i32, month: Month) -> f64 {
    samples
        .iter()
        .filter(|s| {
            let d = utc_day(s.recorded_at);
            d.year() == year && d.month() == month
        })
        .map(|s| s.liters)
        .sum()
}

fn utc_day(ts: OffsetDateTime) -> Date {
    ts.to_offset(UtcOffset::UTC).date()
}

fn sum_between(samples: &[Sample], start: OffsetDateTime, end: OffsetDateTime) -> f64 {
    samples
        .iter()
        .filter(|s| s.recorded_at >= start && s.recorded_at < end)
        .map(|s| s.liters)
        .sum()
}

fn sum_on_day(samples: &[Sample], day: Date) -> f64 {
    samples
        .iter()
        .filter(|s| utc_day(s.recorded_at) == day)
        .map(|s| s.liters)
        .sum()
}

fn point(label: String, current_liters: f64, previous_liters: f64) -> ChartPoint {
    ChartPoint {
        label,
        current_liters,
        previous_liters,
        current_amount: billing::amount_for_liters(current_liters),
    }
}

/// 12 two-hour slots tiling the reference day, previous series = same slots
/// one day earlier.
fn daily_points(samples: &[Sample], reference: OffsetDateTime) -> Vec<ChartPoint> {
    let day_start = reference.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT);
    let prev_start = day_start - Duration::days(1);

    (0..12)
        .map(|slot| {
            let offset = Duration::hours(slot as i64 * 2);
            let width = Duration::hours(2);
            point(
                format!("{:02}:00", slot * 2),
                sum_between(samples, day_start + offset, day_start + offset + width),
                sum_between(samples, prev_start + offset, prev_start + offset + width),
            )
        })
        .collect()
}

/// Mon..Sun of the ISO week containing the reference, previous series = the
/// week before, aligned by weekday.
fn weekly_points(samples: &[Sample], reference: OffsetDateTime) -> Vec<ChartPoint> {
    const LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    let today = utc_day(reference);
    let monday = today - Duration::days(i64::from(today.weekday().number_days_from_monday()));
    let prev_monday = monday - Duration::days(7);

    LABELS
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let offset = Duration::days(i as i64);
            point(
                (*label).to_string(),
                sum_on_day(samples, monday + offset),
                sum_on_day(samples, prev_monday + offset),
            )
        })
        .collect()
}

/// One bucket per day of the reference month, previous series = the prior
/// calendar month aligned by day-of-month. Days the prior month lacks report 0.
fn monthly_points(samples: &[Sample], reference: OffsetDateTime) -> Vec<ChartPoint> {
    let today = utc_day(reference);
    let (year, month) = (today.year(), today.month());
    let (prev_year, prev_month) = match month {
        Month::January => (year - 1, Month::December),
        m => (year, m.previous()),
    };
    let days = time::util::days_in_year_month(year, month);

    (1..=days)
        .map(|day| {
            point(
                day.to_string(),
                sum_on_month_day(samples, year, month, day),
                sum_on_month_day(samples, prev_year, prev_month, day),
            )
        })
        .collect()
}

fn sum_on_month_day(samples: &[Sample], year: i32, month: Month, day: u8) -> f64 {
    samples
        .iter()
        .filter(|s| {
            let d = utc_day(s.recorded_at);
            d.year() == year && d.month() == month && d.day() == day
        })
        .map(|s| s.liters)
        .sum()
}
