// User-facing notices (rendered as toasts by the dashboard)
use super::device_state::{DeviceStatePatch, Schedule, clamp_speed};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }

    /// Confirmation for a user intent. The first field present in the patch
    /// decides the message.
    pub fn for_patch(patch: &DeviceStatePatch, current_threshold: f64, unit: &str) -> Option<Self> {
        if let Some(power) = patch.power {
            return Some(if power {
                Self::info("Fan turned on", "Your fan is now running.")
            } else {
                Self::info("Fan turned off", "Your fan has been stopped.")
            });
        }
        if let Some(speed) = patch.speed {
            return Some(Self::info(
                "Fan speed updated",
                format!("Fan speed set to {}%", clamp_speed(speed)),
            ));
        }
        if let Some(auto_mode) = patch.auto_mode {
            return Some(if auto_mode {
                Self::info(
                    "Auto mode enabled",
                    format!(
                        "Fan will adjust based on temperature threshold ({}°{})",
                        current_threshold, unit
                    ),
                )
            } else {
                Self::info("Auto mode disabled", "Manual control mode activated")
            });
        }
        if let Some(threshold) = patch.auto_threshold {
            return Some(Self::info(
                "Temperature threshold updated",
                format!("Auto mode will activate at {}°{}", threshold, unit),
            ));
        }
        if let Some(energy_saving) = patch.energy_saving {
            return Some(if energy_saving {
                Self::info(
                    "Energy saving mode enabled",
                    "Fan will operate at reduced power to save energy",
                )
            } else {
                Self::info("Energy saving mode disabled", "Fan will operate at normal power")
            });
        }
        if let Some(night_mode) = patch.night_mode {
            return Some(if night_mode {
                Self::info(
                    "Night mode enabled",
                    "Fan will operate quietly during night hours",
                )
            } else {
                Self::info("Night mode disabled", "Fan will operate at normal sound levels")
            });
        }
        patch.schedule.map(|schedule| {
            if schedule.enabled {
                Self::info(
                    "Schedule enabled",
                    format!(
                        "Fan will run from {} to {}",
                        schedule.start_time, schedule.end_time
                    ),
                )
            } else {
                Self::info("Schedule disabled", "Fan will operate manually")
            }
        })
    }

    pub fn auto_adjusted(temperature: f64, speed: u8, unit: &str) -> Self {
        Self::info(
            "Auto-adjusted fan speed",
            format!(
                "Temperature: {}°{} → Fan speed: {}%",
                temperature, unit, speed
            ),
        )
    }

    pub fn schedule_switched(on: bool, schedule: &Schedule) -> Self {
        if on {
            Self::info(
                "Fan turned on by schedule",
                format!("Schedule activated at {}", schedule.start_time),
            )
        } else {
            Self::info(
                "Fan turned off by schedule",
                format!("Schedule deactivated at {}", schedule.end_time),
            )
        }
    }

    pub fn connected() -> Self {
        Self::info(
            "Connected",
            "Successfully connected to your smart fan device.",
        )
    }

    pub fn command_received(command: &str) -> Self {
        Self::info(
            "Voice command received",
            format!("\"{}\" - Processing your request", command),
        )
    }

    pub fn command_not_recognized() -> Self {
        Self::error(
            "Command not recognized",
            "Please try again with a valid command",
        )
    }

    pub fn update_failed(reason: impl std::fmt::Display) -> Self {
        Self::error("Error", format!("Failed to update fan: {}", reason))
    }
}
