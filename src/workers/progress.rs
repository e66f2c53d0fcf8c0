use crate::modules::video::events::ProgressEvent;
use crate::modules::video::repository::VideoStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Where a running job reports its progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Relays events to a single listening connection. A listener that went away
/// is ignored; the job is cancelled separately.
pub struct ChannelSink(pub mpsc::Sender<ProgressEvent>);

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        let _ = self.0.send(event).await;
    }
}

/// Persists percent on the record so a poller in another process can relay it.
/// Terminal errors are carried by the record state instead.
pub struct StoreSink {
    store: Arc<dyn VideoStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn VideoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProgressSink for StoreSink {
    async fn emit(&self, event: ProgressEvent) {
        if let ProgressEvent::Percent { video_id, percent } = event {
            if let Err(e) = self.store.set_progress(video_id, percent).await {
                warn!(%video_id, "Failed to persist progress {}: {}", percent, e);
            }
        }
    }
}
