use std::{pin::Pin, time::SystemTime};

use futures::{Stream, StreamExt};

use aquabill_core::domain::UsageReading;

/// One reading travelling through ingestion, stamped with arrival time so the
/// sink can report end-to-end latency.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub reading: UsageReading,
    pub received_at: SystemTime,
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("source error: {0}")]
    Source(String),
    #[error("validation error: {0}")]
    Validate(String),
    #[error("store error: {0}")]
    Store(String),
}

pub type ReadingStream = Pin<Box<dyn Stream<Item = Result<Envelope, IngestError>> + Send>>;

#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn stream(&self) -> ReadingStream;
}

#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn run(&self, input: ReadingStream) -> Result<(), IngestError>;
}

/// Source -> validate -> sink. Validation is a plain function slot; readings
/// only need one sanitize step between arrival and storage.
pub struct Pipeline<S, K> {
    pub source: S,
    pub validate: fn(UsageReading) -> Result<UsageReading, IngestError>,
    pub sink: K,
}

impl<S, K> Pipeline<S, K>
where
    S: Source + 'static,
    K: Sink + 'static,
{
    pub async fn run(self) -> Result<(), IngestError> {
        let validate = self.validate;
        let stream = self.source.stream().await.map(move |item| {
            item.and_then(|env| {
                validate(env.reading).map(|reading| Envelope {
                    reading,
                    received_at: env.received_at,
                })
            })
        });
        self.sink.run(Box::pin(stream)).await
    }
}
