// Client traits for the remote device-state store
use crate::domain::device_state::DeviceState;
use crate::domain::error::SyncError;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Receives the whole record on every remote change. `None` means the record
/// is absent. Calls may repeat values or arrive after the caller's own write.
pub type StateListener = Arc<dyn Fn(Option<DeviceState>) + Send + Sync>;

/// Receives raw sensor payloads as published on the ingestion path.
pub type PayloadListener = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

#[async_trait]
pub trait RemoteStateClient: Send + Sync {
    /// Current record, or `None` if it was never written
    async fn read(&self) -> Result<Option<DeviceState>, SyncError>;

    /// Replace the whole record
    async fn write(&self, state: &DeviceState) -> Result<(), SyncError>;

    /// Fires once with the current value, then on every change until the
    /// returned subscription is cancelled or dropped
    async fn subscribe(&self, listener: StateListener) -> Result<Subscription, SyncError>;

    /// Whether the push channel is currently delivering changes. `None` for
    /// clients whose subscriptions cannot drop out.
    fn stream_status(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

#[async_trait]
pub trait SensorFeed: Send + Sync {
    async fn subscribe_payloads(&self, listener: PayloadListener)
    -> Result<Subscription, SyncError>;
}

/// Cancellation handle for a listener registration.
///
/// `unsubscribe` is idempotent and also runs on drop.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
