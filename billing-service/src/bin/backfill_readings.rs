use anyhow::{bail, Result};
use billing_service::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::PostgresSink,
    sources::ReadingsCsvFileSource,
    transform,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_readings <csv_file_path>");
    }
    let file_path = &args[1];

    // Load configuration (can point AQUABILL_CONFIG to a backfill-specific file).
    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let sink = PostgresSink::new(
        pool,
        cfg.ingest.batch_size,
        cfg.ingest.max_retries,
        Duration::from_millis(cfg.ingest.retry_backoff_ms),
    );

    let source = ReadingsCsvFileSource::new(file_path);

    let pipeline = Pipeline {
        source,
        validate: transform::sanitize_reading,
        sink,
    };

    pipeline.run().await?;

    Ok(())
}
