// Local sync store - optimistic writes reconciled against the remote record
use crate::application::state_client::{RemoteStateClient, StateListener, Subscription};
use crate::domain::device_state::{DeviceState, DeviceStatePatch};
use crate::domain::error::SyncError;
use crate::domain::notice::Notice;
use crate::domain::sensor::{ReadingWindow, SensorReading};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};

const READING_CHANNEL_CAPACITY: usize = 64;
const NOTICE_CHANNEL_CAPACITY: usize = 32;

/// Last state known to be in the remote store plus the local patches whose
/// writes have not completed yet. Local state is always `confirmed` with the
/// pending patches applied in issue order.
#[derive(Debug, Default)]
struct Ledger {
    confirmed: DeviceState,
    pending: Vec<(u64, DeviceStatePatch)>,
    next_id: u64,
}

impl Ledger {
    fn issue(&mut self, patch: DeviceStatePatch) -> u64 {
        self.next_id += 1;
        self.pending.push((self.next_id, patch));
        self.next_id
    }

    /// Drop a pending patch. False if a remote push already discarded it.
    fn settle(&mut self, id: u64) -> bool {
        match self.pending.iter().position(|(pending, _)| *pending == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    fn projected(&self) -> DeviceState {
        // Patches were validated when issued, so merging cannot fail here
        self.pending
            .iter()
            .fold(self.confirmed.clone(), |state, (_, patch)| {
                state.merged(patch).unwrap_or(state)
            })
    }
}

/// Holds the last-known device state and the recent reading window.
///
/// Local intents are applied immediately and then written through to the
/// remote store. A failed write removes only its own patch; other pending
/// intents stay applied. Remote pushes always replace local state and
/// discard pending patches, so a write failing after a push reverts nothing.
pub struct LocalSyncStore {
    remote: Option<Arc<dyn RemoteStateClient>>,
    state_tx: watch::Sender<DeviceState>,
    connected_tx: watch::Sender<bool>,
    /// Whether remote pushes are currently arriving.
    remote_live: watch::Receiver<bool>,
    ledger: Mutex<Ledger>,
    readings: Mutex<ReadingWindow>,
    readings_tx: broadcast::Sender<SensorReading>,
    notices_tx: broadcast::Sender<Notice>,
}

impl LocalSyncStore {
    pub fn new(remote: Arc<dyn RemoteStateClient>) -> Self {
        Self::build(Some(remote))
    }

    /// A store with no remote handle; every intent fails with `NotInitialized`.
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(remote: Option<Arc<dyn RemoteStateClient>>) -> Self {
        let (state_tx, _) = watch::channel(DeviceState::default());
        let (connected_tx, _) = watch::channel(false);
        let (readings_tx, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        let (notices_tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let remote_live = match remote.as_ref().map(|r| r.stream_status()) {
            Some(Some(status)) => status,
            Some(None) => watch::channel(true).1,
            None => watch::channel(false).1,
        };
        Self {
            remote,
            state_tx,
            connected_tx,
            remote_live,
            ledger: Mutex::new(Ledger::default()),
            readings: Mutex::new(ReadingWindow::default()),
            readings_tx,
            notices_tx,
        }
    }

    /// Load the remote record, creating it with defaults on first use.
    ///
    /// A failed read leaves the defaults in place and is only logged.
    pub async fn bootstrap(&self) -> Result<DeviceState, SyncError> {
        let remote = self.remote.as_ref().ok_or(SyncError::NotInitialized)?;
        match remote.read().await {
            Ok(Some(state)) => {
                tracing::info!("Loaded device state from remote store");
                self.on_remote_update(state.clone());
                Ok(state)
            }
            Ok(None) => {
                let defaults = DeviceState::default();
                tracing::info!("No device record yet, writing defaults");
                remote.write(&defaults).await?;
                Ok(defaults)
            }
            Err(e) => {
                tracing::warn!("Failed to read device state, using defaults: {}", e);
                Ok(self.state())
            }
        }
    }

    /// Register with the remote subscription. The listener only holds a weak
    /// reference, so a dropped store stops receiving updates.
    pub async fn attach(self: &Arc<Self>) -> Result<Subscription, SyncError> {
        let remote = self.remote.as_ref().ok_or(SyncError::NotInitialized)?;
        let store = Arc::downgrade(self);
        let listener: StateListener = Arc::new(move |update: Option<DeviceState>| {
            let Some(store) = store.upgrade() else {
                return;
            };
            match update {
                Some(state) => store.on_remote_update(state),
                None => tracing::warn!("Remote device record is absent; keeping last known state"),
            }
        });
        remote.subscribe(listener).await
    }

    pub fn state(&self) -> DeviceState {
        self.state_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DeviceState> {
        self.state_tx.subscribe()
    }

    /// Merge `patch` locally, then write the full record.
    ///
    /// On write failure the patch is withdrawn and local state is rebuilt
    /// from the confirmed record and the intents still in flight.
    pub async fn apply_local_intent(&self, patch: DeviceStatePatch) -> Result<DeviceState, SyncError> {
        let Some(remote) = self.remote.as_ref() else {
            self.notify(Notice::update_failed(SyncError::NotInitialized));
            return Err(SyncError::NotInitialized);
        };

        let (id, next) = {
            let mut ledger = self.lock_ledger();
            let next = self.state().merged(&patch)?;
            let id = ledger.issue(patch);
            self.state_tx.send_replace(next.clone());
            (id, next)
        };
        tracing::debug!(intent = id, "Applied optimistic update");

        match remote.write(&next).await {
            Ok(()) => {
                let mut ledger = self.lock_ledger();
                if ledger.settle(id) {
                    ledger.confirmed = next.clone();
                    self.publish(ledger.projected());
                }
                Ok(next)
            }
            Err(e) => {
                {
                    let mut ledger = self.lock_ledger();
                    if ledger.settle(id) {
                        self.publish(ledger.projected());
                        tracing::warn!(intent = id, "Write failed, withdrew optimistic update: {}", e);
                    } else {
                        tracing::warn!(intent = id, "Write failed after a remote update, not reverting: {}", e);
                    }
                }
                self.notify(Notice::update_failed(&e));
                Err(e)
            }
        }
    }

    /// Replace local state with the authoritative remote value.
    pub fn on_remote_update(&self, state: DeviceState) {
        let mut ledger = self.lock_ledger();
        if !ledger.pending.is_empty() {
            tracing::debug!(
                discarded = ledger.pending.len(),
                "Remote update supersedes pending intents"
            );
            ledger.pending.clear();
        }
        ledger.confirmed = state.clone();
        if self.publish(state) {
            tracing::debug!("Applied remote update");
        }
    }

    fn publish(&self, state: DeviceState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub fn append_reading(&self, reading: SensorReading) {
        self.lock_readings().push(reading.clone());
        // No subscribers is fine
        let _ = self.readings_tx.send(reading);
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.lock_readings().to_vec()
    }

    pub fn latest_reading(&self) -> Option<SensorReading> {
        self.lock_readings().latest().cloned()
    }

    /// Run `f` against the reading window without copying it.
    pub fn with_readings<T>(&self, f: impl FnOnce(&ReadingWindow) -> T) -> T {
        f(&self.lock_readings())
    }

    pub fn subscribe_readings(&self) -> broadcast::Receiver<SensorReading> {
        self.readings_tx.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        if notice.is_error() {
            tracing::error!("{}: {}", notice.title, notice.description);
        } else {
            tracing::info!("{}: {}", notice.title, notice.description);
        }
        let _ = self.notices_tx.send(notice);
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected_tx.send_replace(connected);
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    /// False while the remote push channel is down and local state may be stale
    pub fn is_remote_live(&self) -> bool {
        *self.remote_live.borrow()
    }

    pub fn watch_remote_live(&self) -> watch::Receiver<bool> {
        self.remote_live.clone()
    }

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_readings(&self) -> MutexGuard<'_, ReadingWindow> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
