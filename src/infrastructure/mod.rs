// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod firebase_client;
pub mod memory_store;
pub mod sse;
