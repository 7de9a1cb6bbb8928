// HTTP request handlers
use crate::application::reconciler::local_clock;
use crate::domain::commands::{find_preset, parse_command};
use crate::domain::device_state::{DeviceState, DeviceStatePatch};
use crate::domain::error::SyncError;
use crate::domain::insights::{DayPhase, Insights};
use crate::domain::notice::Notice;
use crate::domain::sensor::SensorReading;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::future::ready;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

#[derive(Debug)]
pub enum ApiError {
    Sync(SyncError),
    NotFound(String),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Sync(e) => {
                let status = match e {
                    SyncError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    SyncError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::Connectivity(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
        };
        tracing::warn!("Request failed with {}: {}", status, message);
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct StateView {
    pub state: DeviceState,
    pub connected: bool,
    /// False while remote pushes are not arriving and `state` may be stale
    pub remote_live: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn get_state(State(app): State<Arc<AppState>>) -> Json<StateView> {
    Json(StateView {
        state: app.store.state(),
        connected: app.store.is_connected(),
        remote_live: app.store.is_remote_live(),
    })
}

/// Apply a partial update from the dashboard controls
pub async fn post_intent(
    State(app): State<Arc<AppState>>,
    Json(patch): Json<DeviceStatePatch>,
) -> Result<Json<DeviceState>, ApiError> {
    if patch.is_empty() {
        return Err(SyncError::Validation("patch has no fields".to_string()).into());
    }
    let applied = apply_and_confirm(&app, patch).await?;
    Ok(Json(applied))
}

/// Interpret a voice or typed command
pub async fn post_command(
    State(app): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<DeviceState>, ApiError> {
    announce(&app, Notice::command_received(&request.command));

    let Some(patch) = parse_command(&request.command, &app.store.state()) else {
        announce(&app, Notice::command_not_recognized());
        return Err(SyncError::Validation(format!(
            "command not recognized: {}",
            request.command
        ))
        .into());
    };
    let applied = apply_and_confirm(&app, patch).await?;
    Ok(Json(applied))
}

pub async fn post_preset(
    Path(name): Path<String>,
    State(app): State<Arc<AppState>>,
) -> Result<Json<DeviceState>, ApiError> {
    let preset = find_preset(&name)
        .ok_or_else(|| ApiError::NotFound(format!("no preset named {}", name)))?;
    let applied = app.store.apply_local_intent(preset.to_patch()).await?;
    announce(
        &app,
        Notice::info(
            "Preset applied",
            format!("{} preset activated", preset.name),
        ),
    );
    Ok(Json(applied))
}

pub async fn get_readings(State(app): State<Arc<AppState>>) -> Json<Vec<SensorReading>> {
    Json(app.store.readings())
}

pub async fn get_insights(State(app): State<Arc<AppState>>) -> Json<Insights> {
    let state = app.store.state();
    let mut insights = app
        .store
        .with_readings(|window| Insights::compute(&state, window, local_clock()));
    insights.day_phase = *app.day_phase.borrow();
    Json(insights)
}

/// Live dashboard feed as Server-Sent Events
pub async fn stream_events(
    State(app): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = dashboard_events(&app).filter_map(|event| ready(event.into_sse()));
    Sse::new(events.map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default())
}

#[derive(Debug, Clone, PartialEq)]
enum DashboardEvent {
    State(DeviceState),
    Connection(bool),
    RemoteLive(bool),
    Phase(DayPhase),
    Reading(SensorReading),
    Notice(Notice),
}

impl DashboardEvent {
    fn into_sse(self) -> Option<Event> {
        let built = match &self {
            DashboardEvent::State(state) => Event::default().event("state").json_data(state),
            DashboardEvent::Connection(connected) => Event::default()
                .event("connection")
                .json_data(serde_json::json!({ "connected": connected })),
            DashboardEvent::RemoteLive(live) => Event::default()
                .event("sync")
                .json_data(serde_json::json!({ "live": live })),
            DashboardEvent::Phase(phase) => Event::default().event("phase").json_data(phase),
            DashboardEvent::Reading(reading) => {
                Event::default().event("reading").json_data(reading)
            }
            DashboardEvent::Notice(notice) => Event::default().event("notice").json_data(notice),
        };
        match built {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Could not encode {:?}: {}", self, e);
                None
            }
        }
    }
}

/// Merge every store feed into one stream that ends on shutdown.
///
/// Watched values are sent once on subscription. Lagging subscribers skip
/// missed readings and notices.
fn dashboard_events(app: &AppState) -> BoxStream<'static, DashboardEvent> {
    let notifications = app.display.notifications;

    let states = WatchStream::new(app.store.watch())
        .map(DashboardEvent::State)
        .boxed();
    let connection = WatchStream::new(app.store.watch_connected())
        .map(DashboardEvent::Connection)
        .boxed();
    let remote_live = WatchStream::new(app.store.watch_remote_live())
        .map(DashboardEvent::RemoteLive)
        .boxed();
    let phase = WatchStream::new(app.day_phase.clone())
        .map(DashboardEvent::Phase)
        .boxed();
    let readings = BroadcastStream::new(app.store.subscribe_readings())
        .filter_map(|received| ready(received.ok().map(DashboardEvent::Reading)))
        .boxed();
    let notices = BroadcastStream::new(app.store.subscribe_notices())
        .filter_map(move |received| {
            ready(
                received
                    .ok()
                    .filter(|notice| notifications || notice.is_error())
                    .map(DashboardEvent::Notice),
            )
        })
        .boxed();

    stream::select_all([states, connection, remote_live, phase, readings, notices])
        .take_until(app.shutdown.clone().cancelled_owned())
        .boxed()
}

/// Apply `patch` and confirm it with a notice
async fn apply_and_confirm(app: &AppState, patch: DeviceStatePatch) -> Result<DeviceState, SyncError> {
    let applied = app.store.apply_local_intent(patch.clone()).await?;
    if let Some(notice) =
        Notice::for_patch(&patch, applied.auto_threshold, &app.display.temperature_unit)
    {
        announce(app, notice);
    }
    Ok(applied)
}

/// Publish a notice unless notifications are off. Errors always go out.
fn announce(app: &AppState, notice: Notice) {
    if app.display.notifications || notice.is_error() {
        app.store.notify(notice);
    }
}
