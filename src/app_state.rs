use sqlx::PgPool;
use std::sync::Arc;

use crate::services::queue::QueueManager;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<QueueManager>,
    pub algo_version: String,
}

impl AppState {
    pub fn new(db: PgPool, queue: QueueManager, algo_version: String) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            algo_version,
        }
    }
}
