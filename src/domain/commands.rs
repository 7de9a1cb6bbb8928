// Text/voice commands and quick presets translated into state patches
use super::device_state::{DeviceState, DeviceStatePatch, MAX_SPEED, MIN_SPEED, Schedule};

const SPEED_STEP: i16 = 20;

/// Interpret a free-form command. Keywords are checked in a fixed order and
/// the first match wins; `None` means the command was not recognized.
pub fn parse_command(command: &str, state: &DeviceState) -> Option<DeviceStatePatch> {
    let command = command.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| command.contains(w));

    let patch = if has(&["turn on", "start"]) {
        DeviceStatePatch::power(true)
    } else if has(&["turn off", "stop"]) {
        DeviceStatePatch::power(false)
    } else if has(&["increase", "faster"]) {
        DeviceStatePatch::speed((state.speed as i16 + SPEED_STEP).min(MAX_SPEED as i16))
    } else if has(&["decrease", "slower"]) {
        DeviceStatePatch::speed((state.speed as i16 - SPEED_STEP).max(MIN_SPEED as i16))
    } else if has(&["maximum", "full"]) {
        DeviceStatePatch::speed(MAX_SPEED)
    } else if has(&["minimum", "low"]) {
        DeviceStatePatch::speed(20)
    } else if has(&["auto"]) {
        DeviceStatePatch {
            auto_mode: Some(true),
            ..Default::default()
        }
    } else if has(&["manual"]) {
        DeviceStatePatch {
            auto_mode: Some(false),
            ..Default::default()
        }
    } else if has(&["energy", "saving"]) {
        DeviceStatePatch {
            energy_saving: Some(!state.energy_saving),
            ..Default::default()
        }
    } else if has(&["night"]) {
        DeviceStatePatch {
            night_mode: Some(!state.night_mode),
            ..Default::default()
        }
    } else if has(&["schedule"]) {
        DeviceStatePatch {
            schedule: Some(Schedule {
                enabled: !state.schedule.enabled,
                ..state.schedule
            }),
            ..Default::default()
        }
    } else {
        return None;
    };
    Some(patch)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub name: &'static str,
    pub speed: u8,
    pub auto_mode: bool,
    pub energy_saving: bool,
    pub night_mode: bool,
}

impl Preset {
    pub fn to_patch(&self) -> DeviceStatePatch {
        DeviceStatePatch {
            speed: Some(self.speed.into()),
            auto_mode: Some(self.auto_mode),
            energy_saving: Some(self.energy_saving),
            night_mode: Some(self.night_mode),
            ..Default::default()
        }
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "sleep",
        speed: 30,
        auto_mode: false,
        energy_saving: true,
        night_mode: true,
    },
    Preset {
        name: "eco",
        speed: 40,
        auto_mode: true,
        energy_saving: true,
        night_mode: false,
    },
    Preset {
        name: "comfort",
        speed: 60,
        auto_mode: true,
        energy_saving: false,
        night_mode: false,
    },
    Preset {
        name: "boost",
        speed: 100,
        auto_mode: false,
        energy_saving: false,
        night_mode: false,
    },
];

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}
