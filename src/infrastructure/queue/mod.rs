use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod redis_stream;

/// A message leased from the queue. It stays invisible to other consumers
/// until its visibility timeout elapses or it is deleted through `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub handle: String,
    pub body: String,
}

/// At-least-once work queue with visibility-timeout leases.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, body: &str) -> Result<()>;

    /// Long-polls for up to `max_messages`, waiting at most `wait`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>>;

    async fn delete_message(&self, handle: &str) -> Result<()>;
}
