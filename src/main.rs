// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::reconciler::Reconciler;
use crate::application::state_client::{RemoteStateClient, SensorFeed, Subscription};
use crate::application::sync_store::LocalSyncStore;
use crate::application::telemetry::{connect_simulated, esp8266_readings, pump, SimulatedTelemetry};
use crate::infrastructure::config::{load_settings, Backend, TelemetrySource};
use crate::infrastructure::firebase_client::FirebaseClient;
use crate::infrastructure::memory_store::MemoryStateClient;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_insights, get_readings, get_state, health_check, post_command, post_intent, post_preset,
    stream_events,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let settings = load_settings().context("Failed to load configuration")?;

    // Create remote client (infrastructure layer)
    let (remote, feed): (Option<Arc<dyn RemoteStateClient>>, Option<Arc<dyn SensorFeed>>) =
        match settings.remote.backend {
            Backend::Memory => {
                tracing::info!("Using in-memory device store");
                let client = Arc::new(MemoryStateClient::new());
                (
                    Some(client.clone() as Arc<dyn RemoteStateClient>),
                    Some(client as Arc<dyn SensorFeed>),
                )
            }
            Backend::Firebase => match settings.remote.database_url() {
                Some(url) => {
                    tracing::info!("Using Firebase database at {}", url);
                    let client = FirebaseClient::new(
                        url,
                        settings.remote.auth_token.clone(),
                        &settings.remote.state_path,
                        &settings.remote.sensor_path,
                    )
                    .context("Failed to create Firebase client")?
                    .with_reconnect_delay(Duration::from_secs(settings.remote.reconnect_secs))
                    .with_request_timeout(Duration::from_secs(
                        settings.remote.request_timeout_secs,
                    ));
                    let client = Arc::new(client);
                    (
                        Some(client.clone() as Arc<dyn RemoteStateClient>),
                        Some(client as Arc<dyn SensorFeed>),
                    )
                }
                None => {
                    tracing::warn!("No database URL configured, device updates will be rejected");
                    (None, None)
                }
            },
        };

    // Create sync store (application layer)
    let has_remote = remote.is_some();
    let store = Arc::new(match remote {
        Some(remote) => LocalSyncStore::new(remote),
        None => LocalSyncStore::detached(),
    });

    let mut subscriptions: Vec<Subscription> = Vec::new();
    if has_remote {
        if let Err(e) = store.bootstrap().await {
            tracing::warn!("Could not initialize device record: {}", e);
        }
        match store.attach().await {
            Ok(subscription) => subscriptions.push(subscription),
            Err(e) => tracing::warn!("Could not subscribe to device record: {}", e),
        }
    }

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // Start telemetry
    match (settings.telemetry.source, feed) {
        (TelemetrySource::Esp8266, Some(feed)) => {
            match esp8266_readings(feed.as_ref(), store.clone()).await {
                Ok((subscription, readings)) => {
                    subscriptions.push(subscription);
                    tasks.push(tokio::spawn(pump(store.clone(), readings, cancel.clone())));
                }
                Err(e) => tracing::error!("Could not subscribe to sensor feed: {}", e),
            }
        }
        (source, _) => {
            if source == TelemetrySource::Esp8266 {
                tracing::warn!("ESP8266 feed needs a remote store, using simulated telemetry");
            }
            let handshake = {
                let store = store.clone();
                let cancel = cancel.clone();
                let delay = settings.telemetry.connect_delay();
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = connect_simulated(store, delay) => {}
                    }
                }
            };
            tasks.push(tokio::spawn(handshake));

            let readings =
                SimulatedTelemetry::new().readings(store.clone(), settings.telemetry.interval());
            tasks.push(tokio::spawn(pump(store.clone(), readings, cancel.clone())));
        }
    }

    // Start policy loop
    let reconciler = Reconciler::new(store.clone(), settings.display.clone());
    let day_phase = reconciler.day_phase();
    tasks.push(tokio::spawn(reconciler.run(settings.policy.tick(), cancel.clone())));

    // Create application state
    let state = Arc::new(AppState {
        store: store.clone(),
        display: settings.display.clone(),
        day_phase,
        shutdown: cancel.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/state", get(get_state))
        .route("/api/intent", post(post_intent))
        .route("/api/command", post(post_command))
        .route("/api/presets/:name", post(post_preset))
        .route("/api/readings", get(get_readings))
        .route("/api/insights", get(get_insights))
        .route("/api/events", get(stream_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = settings
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", settings.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Starting smartfan dashboard on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Background task failed: {}", e);
        }
    }
    drop(subscriptions);
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                cancel.cancelled().await;
            }
        },
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
