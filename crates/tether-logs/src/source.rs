use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogSourceError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("log backfill failed: {0}")]
    Backfill(String),
    #[error("log tail failed: {0}")]
    Tail(String),
}

/// One-shot history fetch of the last `tail` lines.
pub trait LogBackfill: Send + Sync {
    fn fetch(
        &self,
        container_id: &str,
        tail: usize,
    ) -> BoxFuture<'static, Result<Vec<String>, LogSourceError>>;
}

/// Live tail. Items are raw text as delivered by the source and may hold
/// several lines or a partial line.
pub trait LogTail: Send + Sync {
    fn subscribe(&self, container_id: &str)
        -> BoxStream<'static, Result<String, LogSourceError>>;
}
