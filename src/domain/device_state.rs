// Fan device state domain model
use super::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SPEED: u8 = 0;
pub const MAX_SPEED: u8 = 100;

/// Wall-clock time of day with minute precision ("HH:MM").
///
/// Ordering matches lexical comparison of the zero-padded string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, SyncError> {
        if hour > 23 || minute > 59 {
            return Err(SyncError::Validation(format!(
                "time of day out of range: {}:{}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn from_naive(time: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        // NaiveTime already guarantees hour < 24 and minute < 60
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }
}

impl std::str::FromStr for ClockTime {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SyncError::Validation(format!("expected HH:MM, got '{}'", s));
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub enabled: bool,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: ClockTime { hour: 8, minute: 0 },
            end_time: ClockTime { hour: 22, minute: 0 },
        }
    }
}

impl Schedule {
    /// Same-day window check. A window whose end precedes its start never matches.
    pub fn covers(&self, now: ClockTime) -> bool {
        now >= self.start_time && now <= self.end_time
    }
}

/// The single device record shared with the remote store.
///
/// `power` is stored under the `status` key so records written by plain
/// `{status, speed}` clients decode into the same shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    #[serde(rename = "status")]
    pub power: bool,
    pub speed: u8,
    pub auto_mode: bool,
    pub auto_threshold: f64,
    pub energy_saving: bool,
    pub night_mode: bool,
    pub schedule: Schedule,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: true,
            speed: 50,
            auto_mode: false,
            auto_threshold: 26.0,
            energy_saving: false,
            night_mode: false,
            schedule: Schedule::default(),
        }
    }
}

/// Wire form of the record; every key is optional and speed is unbounded
/// until normalized.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRecord {
    #[serde(default)]
    status: Option<bool>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    auto_mode: Option<bool>,
    #[serde(default)]
    auto_threshold: Option<f64>,
    #[serde(default)]
    energy_saving: Option<bool>,
    #[serde(default)]
    night_mode: Option<bool>,
    #[serde(default)]
    schedule: Option<Schedule>,
}

impl<'de> Deserialize<'de> for DeviceState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = DeviceRecord::deserialize(deserializer)?;
        let defaults = DeviceState::default();
        let auto_threshold = record.auto_threshold.unwrap_or(defaults.auto_threshold);
        if !auto_threshold.is_finite() {
            return Err(serde::de::Error::custom("autoThreshold must be finite"));
        }
        Ok(Self {
            power: record.status.unwrap_or(defaults.power),
            speed: record.speed.map(clamp_speed).unwrap_or(defaults.speed),
            auto_mode: record.auto_mode.unwrap_or(defaults.auto_mode),
            auto_threshold,
            energy_saving: record.energy_saving.unwrap_or(defaults.energy_saving),
            night_mode: record.night_mode.unwrap_or(defaults.night_mode),
            schedule: record.schedule.unwrap_or(defaults.schedule),
        })
    }
}

impl DeviceState {
    /// Decode a record pulled from the remote store.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SyncError> {
        serde_json::from_value(value)
            .map_err(|e| SyncError::Validation(format!("malformed device record: {}", e)))
    }

    /// Merge a partial update, clamping speed and rejecting a non-finite threshold.
    pub fn merged(&self, patch: &DeviceStatePatch) -> Result<Self, SyncError> {
        let mut next = self.clone();
        if let Some(power) = patch.power {
            next.power = power;
        }
        if let Some(speed) = patch.speed {
            next.speed = clamp_speed(speed);
        }
        if let Some(auto_mode) = patch.auto_mode {
            next.auto_mode = auto_mode;
        }
        if let Some(threshold) = patch.auto_threshold {
            if !threshold.is_finite() {
                return Err(SyncError::Validation(format!(
                    "autoThreshold must be finite, got {}",
                    threshold
                )));
            }
            next.auto_threshold = threshold;
        }
        if let Some(energy_saving) = patch.energy_saving {
            next.energy_saving = energy_saving;
        }
        if let Some(night_mode) = patch.night_mode {
            next.night_mode = night_mode;
        }
        if let Some(schedule) = patch.schedule {
            next.schedule = schedule;
        }
        Ok(next)
    }
}

/// Partial update to [`DeviceState`]. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_saving: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub night_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl DeviceStatePatch {
    pub fn power(power: bool) -> Self {
        Self {
            power: Some(power),
            ..Default::default()
        }
    }

    pub fn speed(speed: impl Into<f64>) -> Self {
        Self {
            speed: Some(speed.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Clamp any numeric speed into [0, 100], rounding to the nearest percent.
pub fn clamp_speed(speed: f64) -> u8 {
    if speed.is_nan() {
        return MIN_SPEED;
    }
    speed.round().clamp(MIN_SPEED as f64, MAX_SPEED as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clock_time_parse_and_order() {
        let early: ClockTime = "07:59".parse().unwrap();
        let start: ClockTime = "08:00".parse().unwrap();
        assert!(early < start);
        assert_eq!(start.to_string(), "08:00");

        assert!("8:00".parse::<ClockTime>().is_err());
        assert!("24:00".parse::<ClockTime>().is_err());
        assert!("12:60".parse::<ClockTime>().is_err());
        assert!("noon".parse::<ClockTime>().is_err());
    }

    #[test]
    fn test_merge_clamps_speed() {
        let state = DeviceState::default();

        let high = state.merged(&DeviceStatePatch::speed(250)).unwrap();
        assert_eq!(high.speed, 100);

        let low = state.merged(&DeviceStatePatch::speed(-15)).unwrap();
        assert_eq!(low.speed, 0);

        let nan = state.merged(&DeviceStatePatch::speed(f64::NAN)).unwrap();
        assert_eq!(nan.speed, 0);
    }

    #[test]
    fn test_merge_rejects_non_finite_threshold() {
        let patch = DeviceStatePatch {
            auto_threshold: Some(f64::INFINITY),
            ..Default::default()
        };
        let err = DeviceState::default().merged(&patch).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_merge_leaves_untouched_fields() {
        let state = DeviceState {
            night_mode: true,
            ..Default::default()
        };
        let next = state.merged(&DeviceStatePatch::power(false)).unwrap();
        assert!(!next.power);
        assert!(next.night_mode);
        assert_eq!(next.speed, state.speed);
    }

    #[test]
    fn test_record_uses_status_key() {
        let value = serde_json::to_value(DeviceState::default()).unwrap();
        assert_eq!(value["status"], json!(true));
        assert_eq!(value["schedule"]["startTime"], json!("08:00"));
        assert!(value.get("power").is_none());
    }

    #[test]
    fn test_decode_legacy_record() {
        let state = DeviceState::from_value(json!({ "status": false, "speed": 140 })).unwrap();
        assert!(!state.power);
        assert_eq!(state.speed, 100);
        assert_eq!(state.auto_threshold, 26.0);
        assert_eq!(state.schedule, Schedule::default());
    }

    #[test]
    fn test_decode_rejects_malformed_record() {
        assert!(DeviceState::from_value(json!("on")).is_err());
        assert!(DeviceState::from_value(json!({ "status": "yes" })).is_err());
        assert!(
            DeviceState::from_value(json!({ "schedule": { "enabled": true, "startTime": "8am", "endTime": "22:00" } }))
                .is_err()
        );
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: Result<DeviceStatePatch, _> = serde_json::from_value(json!({ "turbo": true }));
        assert!(result.is_err());
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(DeviceStatePatch::default().is_empty());
        assert!(!DeviceStatePatch::speed(30).is_empty());
    }
}
