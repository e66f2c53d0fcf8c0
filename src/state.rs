use crate::config::settings::AppConfig;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::video::repository::VideoStore;
use crate::workers::transcoder::TranscodeContext;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn VideoStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub jobs: Arc<TranscodeContext>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn VideoStore>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let jobs = Arc::new(TranscodeContext::new(
            store.clone(),
            objects.clone(),
            &config.media,
        ));
        Self {
            config,
            store,
            objects,
            queue,
            jobs,
        }
    }
}
