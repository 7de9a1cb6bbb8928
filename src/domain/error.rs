// Error taxonomy shared by the sync layer and its clients
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// The remote store could not be reached or rejected the request.
    #[error("remote store unreachable: {0}")]
    Connectivity(String),

    /// No remote store handle was configured.
    #[error("remote store not initialized")]
    NotInitialized,

    /// A value was rejected before it was written.
    #[error("invalid value: {0}")]
    Validation(String),
}
