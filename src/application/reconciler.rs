// Reconciler - runs the policy rules against the sync store
use crate::application::sync_store::LocalSyncStore;
use crate::domain::device_state::{ClockTime, DeviceState};
use crate::domain::error::SyncError;
use crate::domain::insights::DayPhase;
use crate::domain::notice::Notice;
use crate::domain::policy::{self, PolicyDecision};
use crate::infrastructure::config::DisplaySettings;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long an identical failed decision is held back before retrying.
const RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct FailedAttempt {
    decision: PolicyDecision,
    state: DeviceState,
    at: Instant,
}

pub struct Reconciler {
    store: Arc<LocalSyncStore>,
    display: DisplaySettings,
    phase_tx: watch::Sender<DayPhase>,
    last_failure: Mutex<Option<FailedAttempt>>,
}

impl Reconciler {
    pub fn new(store: Arc<LocalSyncStore>, display: DisplaySettings) -> Self {
        let (phase_tx, _) = watch::channel(DayPhase::at(local_clock()));
        Self {
            store,
            display,
            phase_tx,
            last_failure: Mutex::new(None),
        }
    }

    /// Day/night phase, re-checked on every timer tick.
    pub fn day_phase(&self) -> watch::Receiver<DayPhase> {
        self.phase_tx.subscribe()
    }

    /// Evaluate the rules once and apply whatever they decide.
    ///
    /// Nothing runs while the device is disconnected. A decision whose write
    /// failed is not re-sent against the same state until `RETRY_AFTER`.
    pub async fn reconcile_once(&self, now: ClockTime) -> Result<Option<PolicyDecision>, SyncError> {
        if !self.store.is_connected() {
            return Ok(None);
        }
        let state = self.store.state();
        let reading = self.store.latest_reading();
        let Some(decision) = policy::evaluate(&state, reading.as_ref(), now) else {
            return Ok(None);
        };
        if self.recently_failed(&decision, &state) {
            tracing::debug!("Holding back policy decision that just failed");
            return Ok(None);
        }

        tracing::info!(
            auto_speed = ?decision.auto_speed,
            scheduled_power = ?decision.scheduled_power,
            "Policy requested a state change"
        );
        let applied = match self.store.apply_local_intent(decision.to_patch()).await {
            Ok(applied) => {
                *self.lock_failure() = None;
                applied
            }
            Err(e) => {
                *self.lock_failure() = Some(FailedAttempt {
                    decision,
                    state,
                    at: Instant::now(),
                });
                return Err(e);
            }
        };

        if self.display.notifications {
            if let (Some(speed), Some(reading)) = (decision.auto_speed, reading.as_ref()) {
                self.store.notify(Notice::auto_adjusted(
                    reading.temperature,
                    speed,
                    &self.display.temperature_unit,
                ));
            }
            if let Some(on) = decision.scheduled_power {
                self.store
                    .notify(Notice::schedule_switched(on, &applied.schedule));
            }
        }
        Ok(Some(decision))
    }

    fn recently_failed(&self, decision: &PolicyDecision, state: &DeviceState) -> bool {
        self.lock_failure().as_ref().is_some_and(|failed| {
            failed.decision == *decision
                && failed.state == *state
                && failed.at.elapsed() < RETRY_AFTER
        })
    }

    fn lock_failure(&self) -> MutexGuard<'_, Option<FailedAttempt>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_day_phase(&self, now: ClockTime) {
        let phase = DayPhase::at(now);
        let changed = self.phase_tx.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
        if changed {
            tracing::info!("Day phase changed to {:?}", phase);
        }
    }

    /// Re-evaluate on every new reading and on every tick until cancelled.
    pub async fn run(self, tick: Duration, cancel: CancellationToken) {
        let mut readings = self.store.subscribe_readings();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_day_phase(local_clock());
                }
                received = readings.recv() => match received {
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Reconciler skipped {} readings", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            if let Err(e) = self.reconcile_once(local_clock()).await {
                tracing::warn!("Policy update failed: {}", e);
            }
        }
        tracing::info!("Reconciler stopped");
    }
}

/// Wall-clock time of day in the local timezone
pub fn local_clock() -> ClockTime {
    ClockTime::from_naive(chrono::Local::now().time())
}
