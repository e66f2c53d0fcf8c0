use crate::config::settings::QueueSettings;
use crate::infrastructure::queue::{JobQueue, QueueMessage};
use crate::modules::video::events::JobMessage;
use crate::workers::progress::StoreSink;
use crate::workers::transcoder::{TranscodeContext, run_job};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Long-lived loop that leases job messages and runs them one at a time.
pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    ctx: Arc<TranscodeContext>,
    settings: QueueSettings,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn JobQueue>, ctx: Arc<TranscodeContext>, settings: QueueSettings) -> Self {
        Self {
            queue,
            ctx,
            settings,
        }
    }

    /// Polls until `shutdown` fires. Shutdown is observed between polls, so a
    /// leased batch is always worked off first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "🎥 Consumer {} listening on '{}'",
            self.settings.consumer, self.settings.stream
        );

        while !shutdown.is_cancelled() {
            if self.poll_once().await == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.idle_sleep) => {}
                }
            }
        }

        info!("Consumer stopped");
    }

    /// One long-poll round. Returns how many messages were leased.
    pub async fn poll_once(&self) -> usize {
        let messages = match self
            .queue
            .receive(
                self.settings.max_messages,
                self.settings.wait,
                self.settings.visibility_timeout,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to receive from queue: {}", e);
                return 0;
            }
        };

        let count = messages.len();
        for message in messages {
            self.handle(message).await;
        }
        count
    }

    async fn handle(&self, message: QueueMessage) {
        let handle = message.handle.as_str();

        let job = match JobMessage::decode(&message.body) {
            Ok(job) => job,
            Err(e) => {
                warn!(%handle, "Dropping undecodable message: {}", e);
                self.delete(handle).await;
                return;
            }
        };

        info!(%handle, video_id = %job.video_id, "📦 Received transcoding job");

        // The job outlives any single listener here, so it is never cancelled.
        let sink = StoreSink::new(self.ctx.store.clone());
        match run_job(&self.ctx, &job, &sink, &CancellationToken::new()).await {
            Ok(_) => self.delete(handle).await,
            Err(e) if e.is_permanent() => {
                warn!(%handle, "Job cannot succeed on retry, removing it: {}", e);
                self.delete(handle).await;
            }
            Err(e) => {
                warn!(%handle, "Leaving job for redelivery: {}", e);
            }
        }
    }

    async fn delete(&self, handle: &str) {
        if let Err(e) = self.queue.delete_message(handle).await {
            error!(%handle, "Failed to delete message: {}", e);
        }
    }
}
