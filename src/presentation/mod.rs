// Presentation layer - HTTP API and event stream for the dashboard
pub mod app_state;
pub mod handlers;
