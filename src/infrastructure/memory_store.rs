// In-process remote store with failure injection
//
// Serves the `memory` backend and stands in for Firebase in tests. Listeners
// are invoked synchronously on every write, the writer's own included.
use crate::application::state_client::{
    PayloadListener, RemoteStateClient, SensorFeed, StateListener, Subscription,
};
use crate::domain::device_state::DeviceState;
use crate::domain::error::SyncError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Registry<L> {
    next_id: u64,
    listeners: Vec<(u64, L)>,
}

impl<L: Clone> Registry<L> {
    fn add(&mut self, listener: L) -> u64 {
        self.next_id += 1;
        self.listeners.push((self.next_id, listener));
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.listeners.retain(|(existing, _)| *existing != id);
    }

    fn snapshot(&self) -> Vec<L> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

pub struct MemoryStateClient {
    record: Mutex<Option<DeviceState>>,
    state_listeners: Arc<Mutex<Registry<StateListener>>>,
    payload_listeners: Arc<Mutex<Registry<PayloadListener>>>,
    should_fail: AtomicBool,
    /// Simulated write latency in milliseconds (0 = no delay).
    write_latency_ms: AtomicU64,
    write_count: AtomicU64,
}

impl Default for MemoryStateClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateClient {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(None),
            state_listeners: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
            payload_listeners: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
            should_fail: AtomicBool::new(false),
            write_latency_ms: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
        }
    }

    pub fn with_state(state: DeviceState) -> Self {
        let client = Self::new();
        *client.lock_record() = Some(state);
        client
    }

    /// Make every subsequent read and write fail with a connectivity error.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn current(&self) -> Option<DeviceState> {
        self.lock_record().clone()
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state_listeners).listeners.len()
    }

    /// Deliver a raw payload to sensor feed subscribers.
    pub fn publish_payload(&self, payload: serde_json::Value) {
        let listeners = lock(&self.payload_listeners).snapshot();
        for listener in listeners {
            listener(payload.clone());
        }
    }

    fn check_should_fail(&self) -> Result<(), SyncError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(SyncError::Connectivity("simulated connectivity loss".to_string()));
        }
        Ok(())
    }

    fn lock_record(&self) -> MutexGuard<'_, Option<DeviceState>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl RemoteStateClient for MemoryStateClient {
    async fn read(&self) -> Result<Option<DeviceState>, SyncError> {
        self.check_should_fail()?;
        Ok(self.current())
    }

    async fn write(&self, state: &DeviceState) -> Result<(), SyncError> {
        let latency = self.write_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_should_fail()?;

        *self.lock_record() = Some(state.clone());
        self.write_count.fetch_add(1, Ordering::Relaxed);

        let listeners = lock(&self.state_listeners).snapshot();
        for listener in listeners {
            listener(Some(state.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, listener: StateListener) -> Result<Subscription, SyncError> {
        self.check_should_fail()?;
        let id = lock(&self.state_listeners).add(listener.clone());
        listener(self.current());

        let registry = Arc::downgrade(&self.state_listeners);
        Ok(Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).remove(id);
            }
        }))
    }
}

#[async_trait]
impl SensorFeed for MemoryStateClient {
    async fn subscribe_payloads(
        &self,
        listener: PayloadListener,
    ) -> Result<Subscription, SyncError> {
        self.check_should_fail()?;
        let id = lock(&self.payload_listeners).add(listener);
        let registry = Arc::downgrade(&self.payload_listeners);
        Ok(Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).remove(id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recording_listener() -> (StateListener, Arc<Mutex<Vec<Option<DeviceState>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: StateListener = Arc::new(move |state: Option<DeviceState>| lock(&sink).push(state));
        (listener, seen)
    }

    #[tokio::test]
    async fn test_read_missing_record() {
        let client = MemoryStateClient::new();
        assert_eq!(client.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscribe_fires_immediately() {
        let client = MemoryStateClient::with_state(DeviceState::default());
        let (listener, seen) = recording_listener();
        let _subscription = client.subscribe(listener).await.unwrap();
        assert_eq!(*lock(&seen), vec![Some(DeviceState::default())]);
    }

    #[tokio::test]
    async fn test_write_round_trips_through_subscription() {
        let client = MemoryStateClient::new();
        let (listener, seen) = recording_listener();
        let subscription = client.subscribe(listener).await.unwrap();

        let state = DeviceState {
            speed: 64,
            energy_saving: true,
            ..Default::default()
        };
        client.write(&state).await.unwrap();
        assert_eq!(lock(&seen).last().cloned(), Some(Some(state)));

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(client.listener_count(), 0);

        client.write(&DeviceState::default()).await.unwrap();
        assert_eq!(lock(&seen).len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = MemoryStateClient::new();
        client.set_should_fail(true);
        assert!(matches!(client.read().await, Err(SyncError::Connectivity(_))));
        assert!(client.write(&DeviceState::default()).await.is_err());
        assert_eq!(client.write_count(), 0);

        client.set_should_fail(false);
        client.write(&DeviceState::default()).await.unwrap();
        assert_eq!(client.write_count(), 1);
    }

    #[tokio::test]
    async fn test_payload_feed() {
        let client = MemoryStateClient::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = client
            .subscribe_payloads(Arc::new(move |_: serde_json::Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        client.publish_payload(serde_json::json!({ "temperature": 25.0 }));
        drop(subscription);
        client.publish_payload(serde_json::json!({ "temperature": 25.5 }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
