use super::{JobQueue, QueueMessage};
use crate::config::settings::QueueSettings;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply};
use std::time::Duration;
use tracing::{debug, info, warn};

const BODY_FIELD: &str = "body";

/// Job queue on a Redis stream with a consumer group.
///
/// Entries read by a consumer stay in the group's pending list until
/// acknowledged. Pending entries idle for longer than the visibility timeout
/// are reclaimed by the next `receive`, which gives SQS-style redelivery.
#[derive(Clone)]
pub struct RedisStreamQueue {
    client: redis::Client,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisStreamQueue {
    pub async fn connect(url: &str, settings: &QueueSettings) -> Result<Self> {
        info!("Connecting to Redis queue at {}", url);
        let client = redis::Client::open(url)
            .map_err(|e| anyhow!("Failed to open Redis client: {}", e))?;

        let queue = Self {
            client,
            stream: settings.stream.clone(),
            group: settings.group.clone(),
            consumer: settings.consumer.clone(),
        };
        queue.ensure_group().await?;

        info!("✅ Connected to Redis queue '{}'", queue.stream);
        Ok(queue)
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Redis connection failed: {}", e))
    }

    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => info!("Created consumer group {}", self.group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists", self.group);
            }
            Err(e) => return Err(anyhow!("Failed to create consumer group: {}", e)),
        }
        Ok(())
    }

    /// Entries without a body surface as empty messages so the consumer discards them.
    fn to_message(entry: StreamId) -> QueueMessage {
        let body = entry.get::<String>(BODY_FIELD).unwrap_or_else(|| {
            warn!("Stream entry {} has no '{}' field", entry.id, BODY_FIELD);
            String::new()
        });
        QueueMessage {
            handle: entry.id,
            body,
        }
    }

    /// Takes over entries whose lease has expired.
    async fn reclaim_expired(
        &self,
        conn: &mut MultiplexedConnection,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max_messages)
            .query_async(conn)
            .await
            .map_err(|e| anyhow!("XAUTOCLAIM failed: {}", e))?;

        if !reply.claimed.is_empty() {
            info!(
                count = reply.claimed.len(),
                "Reclaimed jobs whose visibility timeout expired"
            );
        }
        Ok(reply.claimed.into_iter().map(Self::to_message).collect())
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    async fn send(&self, body: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(&self.stream, "*", &[(BODY_FIELD, body)])
            .await
            .map_err(|e| anyhow!("Failed to publish job: {}", e))?;
        debug!(handle = %id, "Published job to {}", self.stream);
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let mut conn = self.conn().await?;

        let reclaimed = self
            .reclaim_expired(&mut conn, max_messages, visibility_timeout)
            .await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max_messages);
        // BLOCK 0 would wait forever.
        if !wait.is_zero() {
            options = options.block(wait.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await
            .map_err(|e| anyhow!("XREADGROUP failed: {}", e))?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(Self::to_message)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_message(&self, handle: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[handle])
            .await
            .map_err(|e| anyhow!("XACK failed: {}", e))?;
        let _: i64 = conn
            .xdel(&self.stream, &[handle])
            .await
            .map_err(|e| anyhow!("XDEL failed: {}", e))?;
        Ok(())
    }
}
