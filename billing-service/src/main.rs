use anyhow::Result;
use billing_service::{
    api::{self, ApiState},
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::PostgresSink,
    sources::HttpJsonSource,
    transform,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    // Reading-ingestion pipeline
    let source = HttpJsonSource::new(&cfg.ingest.http_bind_addr, cfg.ingest.channel_capacity).await?;
    let sink = PostgresSink::new(
        pool.clone(),
        cfg.ingest.batch_size,
        cfg.ingest.max_retries,
        Duration::from_millis(cfg.ingest.retry_backoff_ms),
    );
    let pipeline = Pipeline {
        source,
        validate: transform::sanitize_reading,
        sink,
    };

    // Customer-facing API
    let api_addr: SocketAddr = cfg
        .api
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api.bind_addr: {e}"))?;
    let router = api::router(ApiState { pool });
    let serve_api = async move {
        let listener = tokio::net::TcpListener::bind(api_addr).await?;
        tracing::info!(%api_addr, "billing API listening");
        axum::serve(listener, router.into_make_service()).await?;
        Ok::<(), anyhow::Error>(())
    };

    let run_pipeline = async move { pipeline.run().await.map_err(anyhow::Error::from) };

    tokio::try_join!(run_pipeline, serve_api)?;

    Ok(())
}
