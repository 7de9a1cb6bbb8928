// Application layer - Sync store, policy loop and telemetry use cases
pub mod reconciler;
pub mod state_client;
pub mod sync_store;
pub mod telemetry;
