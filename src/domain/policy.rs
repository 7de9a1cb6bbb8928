// Reconciliation rules: auto mode and schedule
use super::device_state::{ClockTime, DeviceState, DeviceStatePatch, clamp_speed};
use super::sensor::SensorReading;

/// Speed used by auto mode while the room is at or below the threshold.
pub const AUTO_IDLE_SPEED: u8 = 20;

/// Speed auto mode wants for the given temperature.
pub fn auto_target_speed(temperature: f64, threshold: f64) -> u8 {
    if temperature > threshold {
        clamp_speed(((temperature - threshold) * 20.0).round() + 40.0)
    } else {
        AUTO_IDLE_SPEED
    }
}

/// Auto mode rule. Emits a speed intent only when the target differs.
pub fn auto_mode_rule(state: &DeviceState, reading: &SensorReading) -> Option<u8> {
    if !state.auto_mode {
        return None;
    }
    let target = auto_target_speed(reading.temperature, state.auto_threshold);
    (target != state.speed).then_some(target)
}

/// Schedule rule. Emits a power intent only when the window disagrees with
/// the current power state.
pub fn schedule_rule(state: &DeviceState, now: ClockTime) -> Option<bool> {
    if !state.schedule.enabled {
        return None;
    }
    let should_be_on = state.schedule.covers(now);
    (should_be_on != state.power).then_some(should_be_on)
}

/// Outcome of one evaluation, keeping track of which rule fired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    pub auto_speed: Option<u8>,
    pub scheduled_power: Option<bool>,
}

impl PolicyDecision {
    pub fn is_empty(&self) -> bool {
        self.auto_speed.is_none() && self.scheduled_power.is_none()
    }

    pub fn to_patch(&self) -> DeviceStatePatch {
        DeviceStatePatch {
            speed: self.auto_speed.map(f64::from),
            power: self.scheduled_power,
            ..Default::default()
        }
    }
}

/// Evaluate both rules. Without a reading only the schedule can fire.
pub fn evaluate(
    state: &DeviceState,
    reading: Option<&SensorReading>,
    now: ClockTime,
) -> Option<PolicyDecision> {
    let decision = PolicyDecision {
        auto_speed: reading.and_then(|r| auto_mode_rule(state, r)),
        scheduled_power: schedule_rule(state, now),
    };
    (!decision.is_empty()).then_some(decision)
}
