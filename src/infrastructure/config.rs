use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub policy: PolicySettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub display: DisplaySettings,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Firebase,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteSettings {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub auth_token: Option<String>,
    pub state_path: String,
    pub sensor_path: String,
    pub reconnect_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Firebase,
            database_url: None,
            auth_token: None,
            state_path: "FanControl".to_string(),
            sensor_path: "esp8266/data".to_string(),
            reconnect_secs: 5,
            request_timeout_secs: 10,
        }
    }
}

impl RemoteSettings {
    /// Configured database URL, treating a blank value as absent
    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    #[default]
    Simulated,
    Esp8266,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetrySettings {
    pub source: TelemetrySource,
    pub interval_secs: u64,
    pub connect_delay_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            source: TelemetrySource::Simulated,
            interval_secs: 3,
            connect_delay_ms: 1500,
        }
    }
}

impl TelemetrySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolicySettings {
    pub tick_secs: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self { tick_secs: 60 }
    }
}

impl PolicySettings {
    /// Schedule checks run at least once a minute
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.clamp(1, 60))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplaySettings {
    pub temperature_unit: String,
    pub notifications: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            temperature_unit: "C".to_string(),
            notifications: true,
        }
    }
}

/// Load `config/fanctl` (optional) overlaid with `FANCTL__*` environment variables
pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/fanctl").required(false))
        .add_source(
            config::Environment::with_prefix("FANCTL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
