use std::time::Duration;

use futures::StreamExt;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};

use crate::pipeline::{Envelope, IngestError, ReadingStream, Sink};

/// Batched Postgres sink for flow readings, with bounded retry and linear
/// backoff on flush failure.
pub struct PostgresSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PostgresSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            batch_size,
            max_retries,
            retry_backoff,
        }
    }

    async fn flush_batch(&self, batch: &[Envelope]) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            match self.insert_batch(batch).await {
                Ok(()) => {
                    let counter = metrics::counter!("flow_readings_ingested_total");
                    counter.increment(batch.len() as u64);

                    // Approximate end-to-end latency from earliest received_at to now.
                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            let hist = metrics::histogram!("ingest_end_to_end_latency_seconds");
                            hist.record(dur.as_secs_f64());
                        }
                    }

                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "postgres sink flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "postgres sink flush failed, giving up");
                    metrics::counter!("flow_sink_errors_total").increment(1);
                    return Err(IngestError::Store(e.to_string()));
                }
            }
        }
    }

    async fn insert_batch(&self, batch: &[Envelope]) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO flow_readings (recorded_at, account_id, meter_id, liters, flow_rate_lpm, source_system) ",
        );

        builder.push_values(batch, |mut b, env| {
            let r = &env.reading;
            b.push_bind(r.recorded_at)
                .push_bind(&r.account_id)
                .push_bind(&r.meter_id)
                .push_bind(r.liters)
                .push_bind(&r.flow_rate_lpm)
                .push_bind(&r.source_system);
        });

        let query = builder.build();
        query.execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Sink for PostgresSink {
    async fn run(&self, mut input: ReadingStream) -> Result<(), IngestError> {
        let mut buffer: Vec<Envelope> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for PostgresSink");
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            self.flush_batch(&buffer).await?;
        }

        Ok(())
    }
}
