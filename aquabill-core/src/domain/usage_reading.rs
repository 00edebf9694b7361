use time::OffsetDateTime;

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct UsageReading {
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub account_id: String,
    pub meter_id: Option<String>,
    pub liters: f64,
    pub flow_rate_lpm: Option<f64>,
    pub source_system: Option<String>,
}

/// A usage sample as it crosses an untrusted boundary (HTTP ingest, CSV
/// backfill, legacy exports). The timestamp stays a string until cleaning so
/// one bad value drops only its own sample.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawReading {
    pub recorded_at: String,
    pub liters: f64,
}
