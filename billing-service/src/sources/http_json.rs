use std::{net::SocketAddr, sync::Arc, time::SystemTime};

use axum::{extract::State, routing::post, Json, Router};
use aquabill_core::{
    aggregate::{self, ReadingWarning},
    domain::{RawReading, UsageReading},
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::pipeline::{Envelope, IngestError, ReadingStream, Source};

#[derive(Clone)]
struct SharedSender {
    tx: mpsc::Sender<Envelope>,
}

/// HTTP JSON source for meter flow readings: `POST /ingest/flow` with an array
/// of samples. Timestamps arrive as strings; a sample with an unparseable
/// timestamp is rejected individually and counted, never the whole batch.
#[derive(Clone)]
pub struct HttpJsonSource {
    receiver: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Envelope>>>>,
}

#[derive(serde::Deserialize)]
struct IncomingReading {
    recorded_at: String,
    account_id: String,
    meter_id: Option<String>,
    liters: f64,
    flow_rate_lpm: Option<f64>,
    source_system: Option<String>,
}

#[derive(serde::Serialize)]
struct IngestResponse {
    accepted: usize,
    rejected: usize,
}

impl HttpJsonSource {
    pub async fn new(bind_addr: &str, channel_capacity: usize) -> Result<Self, IngestError> {
        let (tx, rx) = mpsc::channel(channel_capacity);
        let shared = SharedSender { tx };

        let app = Router::new()
            .route("/ingest/flow", post(ingest_flow))
            .with_state(shared.clone());

        let addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| IngestError::Source(format!("invalid bind addr: {e}")))?;

        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        tracing::error!(error = %e, "HTTP JSON source server error");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind HTTP JSON source listener");
                }
            }
        });

        Ok(Self {
            receiver: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        })
    }
}

#[async_trait::async_trait]
impl Source for HttpJsonSource {
    async fn stream(&self) -> ReadingStream {
        let mut guard = self.receiver.lock().await;
        let rx = guard
            .take()
            .expect("HttpJsonSource stream already taken; only one consumer supported");

        Box::pin(ReceiverStream::new(rx).map(Ok))
    }
}

async fn ingest_flow(
    State(sender): State<SharedSender>,
    Json(payload): Json<Vec<IncomingReading>>,
) -> Result<Json<IngestResponse>, axum::http::StatusCode> {
    metrics::counter!("flow_ingest_requests_total").increment(1);

    let mut accepted = 0;
    let mut rejected = 0;

    for incoming in payload {
        let (reading, warnings) = clean_incoming(incoming);
        for warning in &warnings {
            if matches!(warning, ReadingWarning::BadTimestamp { .. }) {
                metrics::counter!("flow_ingest_bad_timestamp_total").increment(1);
            }
            tracing::warn!(warning = %warning, "flow reading cleaned");
        }

        let Some(reading) = reading else {
            rejected += 1;
            continue;
        };

        let env = Envelope {
            reading,
            received_at: SystemTime::now(),
        };

        if sender.tx.send(env).await.is_err() {
            // Channel closed; treat as server error
            metrics::counter!("flow_ingest_failed_total").increment(1);
            return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        }
        accepted += 1;
    }

    Ok(Json(IngestResponse { accepted, rejected }))
}

/// Apply the shared cleaning contract to one incoming sample: an unparseable
/// timestamp drops the sample, negative or non-finite liters are clamped.
fn clean_incoming(incoming: IncomingReading) -> (Option<UsageReading>, Vec<ReadingWarning>) {
    let raw = RawReading {
        recorded_at: incoming.recorded_at,
        liters: incoming.liters,
    };
    let (samples, warnings) = aggregate::clean_readings(std::slice::from_ref(&raw));

    let reading = samples.first().map(|sample| UsageReading {
        recorded_at: sample.recorded_at,
        account_id: incoming.account_id,
        meter_id: incoming.meter_id,
        liters: sample.liters,
        flow_rate_lpm: incoming.flow_rate_lpm,
        source_system: incoming.source_system,
    });

    (reading, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(recorded_at: &str, liters: f64) -> IncomingReading {
        IncomingReading {
            recorded_at: recorded_at.to_string(),
            account_id: "acct-1".to_string(),
            meter_id: None,
            liters,
            flow_rate_lpm: None,
            source_system: None,
        }
    }

    #[test]
    fn clean_incoming_accepts_a_valid_sample() {
        let (reading, warnings) = clean_incoming(incoming("2024-03-01T01:00:00Z", 12.5));
        let reading = reading.expect("sample should survive cleaning");
        assert_eq!(reading.liters, 12.5);
        assert_eq!(reading.account_id, "acct-1");
        assert!(warnings.is_empty());
    }

    #[test]
    fn clean_incoming_rejects_a_bad_timestamp_with_a_warning() {
        let (reading, warnings) = clean_incoming(incoming("yesterday-ish", 12.5));
        assert!(reading.is_none());
        assert!(matches!(
            warnings.as_slice(),
            [ReadingWarning::BadTimestamp { .. }]
        ));
    }

    #[test]
    fn clean_incoming_clamps_negative_liters() {
        let (reading, warnings) = clean_incoming(incoming("2024-03-01T01:00:00Z", -5.0));
        assert_eq!(reading.expect("sample kept").liters, 0.0);
        assert!(matches!(
            warnings.as_slice(),
            [ReadingWarning::ClampedNegative { .. }]
        ));
    }
}
