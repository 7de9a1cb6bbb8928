// Telemetry sources - simulated device and ESP8266 feed
use crate::application::state_client::{PayloadListener, SensorFeed, Subscription};
use crate::application::sync_store::LocalSyncStore;
use crate::domain::device_state::DeviceState;
use crate::domain::error::SyncError;
use crate::domain::notice::Notice;
use crate::domain::sensor::{Esp8266Payload, SensorReading, nominal_rpm, power_draw};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const TEMPERATURE_STEP: f64 = 0.2;
const HUMIDITY_STEP: f64 = 1.0;
const RPM_NOISE: f64 = 25.0;
const FEED_BUFFER: usize = 32;

/// Stand-in for a real device: temperature and humidity follow a random walk
/// (no mean reversion, so long runs drift), RPM and power follow fan state.
pub struct SimulatedTelemetry {
    temperature: f64,
    humidity: f64,
    rng: StdRng,
}

impl Default for SimulatedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTelemetry {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            temperature: 24.5,
            humidity: 45.0,
            rng,
        }
    }

    pub fn sample(&mut self, state: &DeviceState, timestamp: DateTime<Utc>) -> SensorReading {
        self.temperature = round1(
            self.temperature + self.rng.random_range(-TEMPERATURE_STEP..=TEMPERATURE_STEP),
        );
        self.humidity =
            round1(self.humidity + self.rng.random_range(-HUMIDITY_STEP..=HUMIDITY_STEP));

        let rpm = if state.power {
            (nominal_rpm(state) + self.rng.random_range(-RPM_NOISE..=RPM_NOISE))
                .round()
                .max(0.0) as u32
        } else {
            0
        };

        SensorReading {
            timestamp,
            temperature: self.temperature,
            humidity: self.humidity,
            rpm,
            fan_speed: state.speed,
            power_usage: round1(power_draw(state)),
        }
    }

    /// Lazy reading sequence: one sample per `period`, skipped while the
    /// store reports the device as disconnected.
    pub fn readings(
        mut self,
        store: Arc<LocalSyncStore>,
        period: Duration,
    ) -> impl Stream<Item = SensorReading> + Send + 'static {
        async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !store.is_connected() {
                    continue;
                }
                let state = store.state();
                yield self.sample(&state, Utc::now());
            }
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Mark the simulated device as connected after the handshake delay.
pub async fn connect_simulated(store: Arc<LocalSyncStore>, delay: Duration) {
    tokio::time::sleep(delay).await;
    store.set_connected(true);
    store.notify(Notice::connected());
}

/// Subscribe to the raw sensor path and turn valid payloads into readings.
///
/// The first valid payload marks the device as connected. Malformed payloads
/// are logged and dropped.
pub async fn esp8266_readings(
    feed: &dyn SensorFeed,
    store: Arc<LocalSyncStore>,
) -> Result<(Subscription, ReceiverStream<SensorReading>), SyncError> {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let weak = Arc::downgrade(&store);

    let listener: PayloadListener = Arc::new(move |value: serde_json::Value| {
        let Some(store) = weak.upgrade() else {
            return;
        };
        if value.is_null() {
            tracing::debug!("Sensor path is empty");
            return;
        }
        let payload = match Esp8266Payload::decode(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Rejected ESP8266 payload: {}", e);
                return;
            }
        };
        let reading = match payload.into_reading(
            &store.state(),
            store.latest_reading().as_ref(),
            Utc::now(),
        ) {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!("Rejected ESP8266 payload: {}", e);
                return;
            }
        };
        if !store.is_connected() {
            store.set_connected(true);
            store.notify(Notice::connected());
        }
        if tx.try_send(reading).is_err() {
            tracing::warn!("Dropping ESP8266 reading, consumer is behind");
        }
    });

    let subscription = feed.subscribe_payloads(listener).await?;
    Ok((subscription, ReceiverStream::new(rx)))
}

/// Feed readings into the store until the stream ends or `cancel` fires.
pub async fn pump<S>(store: Arc<LocalSyncStore>, readings: S, cancel: CancellationToken)
where
    S: Stream<Item = SensorReading> + Send,
{
    tokio::pin!(readings);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = readings.next() => match next {
                Some(reading) => store.append_reading(reading),
                None => {
                    tracing::warn!("Telemetry source ended");
                    break;
                }
            },
        }
    }
    tracing::info!("Telemetry pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStateClient;
    use serde_json::json;

    #[test]
    fn test_sample_follows_fan_state() {
        let mut sim = SimulatedTelemetry::seeded(7);
        let state = DeviceState::default();
        let reading = sim.sample(&state, Utc::now());
        assert!((reading.rpm as f64 - 1200.0).abs() <= RPM_NOISE + 1.0);
        assert_eq!(reading.fan_speed, 50);
        assert_eq!(reading.power_usage, 15.0);

        let off = DeviceState {
            power: false,
            ..Default::default()
        };
        let reading = sim.sample(&off, Utc::now());
        assert_eq!(reading.rpm, 0);
        assert_eq!(reading.power_usage, 0.5);
    }

    #[test]
    fn test_random_walk_steps_are_bounded() {
        let mut sim = SimulatedTelemetry::seeded(42);
        let state = DeviceState::default();
        let mut previous = sim.sample(&state, Utc::now());
        for _ in 0..200 {
            let next = sim.sample(&state, Utc::now());
            assert!((next.temperature - previous.temperature).abs() <= TEMPERATURE_STEP + 1e-9);
            assert!((next.humidity - previous.humidity).abs() <= HUMIDITY_STEP + 1e-9);
            previous = next;
        }
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let state = DeviceState::default();
        let ts = Utc::now();
        let mut a = SimulatedTelemetry::seeded(3);
        let mut b = SimulatedTelemetry::seeded(3);
        for _ in 0..10 {
            assert_eq!(a.sample(&state, ts), b.sample(&state, ts));
        }
    }

    #[tokio::test]
    async fn test_stream_waits_for_connection() {
        let store = Arc::new(LocalSyncStore::detached());
        let stream = SimulatedTelemetry::seeded(1).readings(store.clone(), Duration::from_millis(5));
        tokio::pin!(stream);

        let idle = tokio::time::timeout(Duration::from_millis(40), stream.next()).await;
        assert!(idle.is_err());

        store.set_connected(true);
        let reading = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.fan_speed, store.state().speed);
    }

    #[tokio::test]
    async fn test_pump_fills_store() {
        let store = Arc::new(LocalSyncStore::detached());
        let mut sim = SimulatedTelemetry::seeded(9);
        let state = DeviceState::default();
        let readings: Vec<_> = (0..5).map(|_| sim.sample(&state, Utc::now())).collect();

        pump(store.clone(), futures::stream::iter(readings), CancellationToken::new()).await;
        assert_eq!(store.readings().len(), 5);
    }

    #[tokio::test]
    async fn test_esp8266_feed() {
        let client = MemoryStateClient::new();
        let store = Arc::new(LocalSyncStore::detached());
        let (subscription, stream) = esp8266_readings(&client, store.clone()).await.unwrap();
        tokio::pin!(stream);

        client.publish_payload(json!("garbage"));
        client.publish_payload(json!({ "humidity": 40 }));
        assert!(!store.is_connected());
        assert!(store.latest_reading().is_none());
        client.publish_payload(json!({ "temperature": 29.5, "humidity": 40 }));

        let reading = stream.next().await.unwrap();
        assert_eq!(reading.temperature, 29.5);
        assert_eq!(reading.humidity, 40.0);
        assert!(store.is_connected());

        drop(subscription);
        client.publish_payload(json!({ "temperature": 30.0 }));
        // listener (and its sender) are gone, so the stream ends
        assert!(stream.next().await.is_none());
    }
}
