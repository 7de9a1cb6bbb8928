// Derived dashboard values: power estimate, comfort band, day phase, forecast
use super::device_state::{ClockTime, DeviceState};
use super::sensor::{ReadingWindow, nominal_rpm, power_draw};
use serde::Serialize;

/// Forecast horizon in hours, "Now" included as hour zero.
const FORECAST_HOURS: u32 = 5;

/// Cap on the extrapolated trend. The window spans ~90 s, so an uncapped
/// slope turns sensor noise into absurd hourly swings.
const MAX_TREND_PER_HOUR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComfortBand {
    Cool,
    Comfortable,
    Warm,
    Hot,
}

impl ComfortBand {
    pub fn for_temperature(temperature: f64) -> Self {
        if temperature < 18.0 {
            ComfortBand::Cool
        } else if temperature < 24.0 {
            ComfortBand::Comfortable
        } else if temperature < 28.0 {
            ComfortBand::Warm
        } else {
            ComfortBand::Hot
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    Day,
    Night,
}

impl DayPhase {
    pub fn at(now: ClockTime) -> Self {
        if (6..18).contains(&now.hour()) {
            DayPhase::Day
        } else {
            DayPhase::Night
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerEstimate {
    pub watts: f64,
    pub daily_kwh: f64,
    /// Watts saved by energy saving mode compared to normal operation.
    pub saved_watts: f64,
    pub expected_rpm: u32,
}

impl PowerEstimate {
    pub fn for_state(state: &DeviceState) -> Self {
        let watts = round1(power_draw(state));
        let full = power_draw(&DeviceState {
            energy_saving: false,
            ..state.clone()
        });
        Self {
            watts,
            daily_kwh: (watts * 24.0 / 1000.0 * 1000.0).round() / 1000.0,
            saved_watts: round1(full - power_draw(state)),
            expected_rpm: nominal_rpm(state).round() as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub label: String,
    pub temperature: f64,
}

/// Project temperature over the next hours from the trend in the window.
///
/// Uses a least-squares slope over the retained readings, capped to
/// [`MAX_TREND_PER_HOUR`]. Returns an empty forecast for an empty window.
pub fn forecast(window: &ReadingWindow) -> Vec<ForecastPoint> {
    let Some(latest) = window.latest() else {
        return Vec::new();
    };
    let origin = latest.timestamp;
    let samples: Vec<(f64, f64)> = window
        .iter()
        .map(|r| {
            let hours = (r.timestamp - origin).num_milliseconds() as f64 / 3_600_000.0;
            (hours, r.temperature)
        })
        .collect();

    let slope = least_squares_slope(&samples)
        .unwrap_or(0.0)
        .clamp(-MAX_TREND_PER_HOUR, MAX_TREND_PER_HOUR);

    (0..=FORECAST_HOURS)
        .map(|h| ForecastPoint {
            label: if h == 0 {
                "Now".to_string()
            } else {
                format!("{}h", h)
            },
            temperature: round1(latest.temperature + slope * h as f64),
        })
        .collect()
}

fn least_squares_slope(samples: &[(f64, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (num, den) = samples.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
        (num + (x - mean_x) * (y - mean_y), den + (x - mean_x).powi(2))
    });
    (den > f64::EPSILON).then(|| num / den)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub power: PowerEstimate,
    pub comfort: Option<ComfortBand>,
    pub day_phase: DayPhase,
    pub forecast: Vec<ForecastPoint>,
}

impl Insights {
    pub fn compute(state: &DeviceState, window: &ReadingWindow, now: ClockTime) -> Self {
        Self {
            power: PowerEstimate::for_state(state),
            comfort: window
                .latest()
                .map(|r| ComfortBand::for_temperature(r.temperature)),
            day_phase: DayPhase::at(now),
            forecast: forecast(window),
        }
    }
}
