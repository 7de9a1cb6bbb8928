// Application state for HTTP handlers
use crate::application::sync_store::LocalSyncStore;
use crate::domain::insights::DayPhase;
use crate::infrastructure::config::DisplaySettings;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LocalSyncStore>,
    pub display: DisplaySettings,
    pub day_phase: watch::Receiver<DayPhase>,
    /// Ends long-lived event streams on shutdown
    pub shutdown: CancellationToken,
}
