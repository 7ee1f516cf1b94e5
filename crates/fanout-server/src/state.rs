//! Shared application state.

use std::sync::Arc;

use fanout_engine::PlaybackEngine;

use crate::batches::BatchTracker;
use crate::config::ServerSettings;

/// Shared state for Actix handlers and background workers.
///
/// One engine per process; handlers borrow it through `web::Data`.
pub struct AppState {
    /// Multi-device playback engine.
    pub engine: Arc<PlaybackEngine>,
    /// Batch tracker owning spooled temp files.
    pub batches: BatchTracker,
    /// Resolved runtime settings.
    pub settings: ServerSettings,
}

impl AppState {
    pub fn new(engine: Arc<PlaybackEngine>, batches: BatchTracker, settings: ServerSettings) -> Self {
        Self {
            engine,
            batches,
            settings,
        }
    }
}
