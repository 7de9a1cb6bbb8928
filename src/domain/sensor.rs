// Sensor reading domain models
use super::device_state::DeviceState;
use super::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of readings retained for charts and trends.
pub const READING_WINDOW: usize = 30;

/// Draw reported while the fan is switched off.
pub const STANDBY_WATTS: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub rpm: u32,
    pub fan_speed: u8,
    pub power_usage: f64,
}

/// Fixed-capacity FIFO of readings; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct ReadingWindow {
    capacity: usize,
    readings: VecDeque<SensorReading>,
}

impl Default for ReadingWindow {
    fn default() -> Self {
        Self::with_capacity(READING_WINDOW)
    }
}

impl ReadingWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a reading, returning the evicted one if the window was full.
    pub fn push(&mut self, reading: SensorReading) -> Option<SensorReading> {
        let evicted = if self.readings.len() == self.capacity {
            self.readings.pop_front()
        } else {
            None
        };
        self.readings.push_back(reading);
        evicted
    }

    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    pub fn to_vec(&self) -> Vec<SensorReading> {
        self.readings.iter().cloned().collect()
    }
}

/// Raw payload published by the ESP8266 node. Every field is optional on the
/// wire; values that are present must be numbers in a plausible range.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Esp8266Payload {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub rpm: Option<f64>,
    #[serde(default)]
    pub fan_speed: Option<f64>,
    #[serde(default)]
    pub power_usage: Option<f64>,
}

impl Esp8266Payload {
    pub fn decode(value: serde_json::Value) -> Result<Self, SyncError> {
        if !value.is_object() {
            return Err(SyncError::Validation(format!(
                "sensor payload must be an object, got {}",
                value
            )));
        }
        let payload: Self = serde_json::from_value(value)
            .map_err(|e| SyncError::Validation(format!("malformed sensor payload: {}", e)))?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), SyncError> {
        // DHT-class sensor limits
        check_range("temperature", self.temperature, -40.0, 85.0)?;
        check_range("humidity", self.humidity, 0.0, 100.0)?;
        check_range("rpm", self.rpm, 0.0, 10_000.0)?;
        check_range("fanSpeed", self.fan_speed, 0.0, 100.0)?;
        check_range("powerUsage", self.power_usage, 0.0, 1_000.0)?;
        if self.temperature.is_none() && self.humidity.is_none() {
            return Err(SyncError::Validation(
                "sensor payload carries neither temperature nor humidity".to_string(),
            ));
        }
        Ok(())
    }

    /// Turn the payload into a reading, filling gaps from the previous
    /// reading and from the current fan state.
    ///
    /// Temperature and humidity are never invented: a payload missing one of
    /// them is rejected until a previous reading can supply it.
    pub fn into_reading(
        self,
        state: &DeviceState,
        previous: Option<&SensorReading>,
        timestamp: DateTime<Utc>,
    ) -> Result<SensorReading, SyncError> {
        let missing = |field: &str| {
            SyncError::Validation(format!(
                "sensor payload has no {} and there is no earlier reading",
                field
            ))
        };
        let temperature = self
            .temperature
            .or(previous.map(|r| r.temperature))
            .ok_or_else(|| missing("temperature"))?;
        let humidity = self
            .humidity
            .or(previous.map(|r| r.humidity))
            .ok_or_else(|| missing("humidity"))?;
        Ok(SensorReading {
            timestamp,
            temperature,
            humidity,
            rpm: self
                .rpm
                .map(|rpm| rpm.round() as u32)
                .unwrap_or_else(|| nominal_rpm(state).round() as u32),
            fan_speed: self
                .fan_speed
                .map(|s| s.round() as u8)
                .unwrap_or(state.speed),
            power_usage: self.power_usage.unwrap_or_else(|| power_draw(state)),
        })
    }
}

fn check_range(field: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), SyncError> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(SyncError::Validation(format!(
            "{} out of range [{}, {}]: {}",
            field, min, max, v
        ))),
        _ => Ok(()),
    }
}

/// Noise-free RPM for the given state.
pub fn nominal_rpm(state: &DeviceState) -> f64 {
    if state.power {
        state.speed as f64 * 24.0
    } else {
        0.0
    }
}

/// Electrical draw in watts for the given state.
pub fn power_draw(state: &DeviceState) -> f64 {
    if state.power {
        let factor = if state.energy_saving { 0.7 } else { 1.0 };
        state.speed as f64 * 0.3 * factor
    } else {
        STANDBY_WATTS
    }
}
