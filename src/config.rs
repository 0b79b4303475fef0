//! Configuration management.
//!
//! Settings load from layered TOML files through the `config` crate, the
//! same `Settings::new(Option<&str>)` shape used across this codebase's
//! tooling. Durations are written human-readable (`heartbeat = "10s"`) and
//! parsed via `humantime-serde`. Validation failures are the only condition
//! that aborts agent startup.

use crate::error::{AgentError, AgentResult};
use crate::observation::{Category, Representation};
use config::Config;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub buffer: BufferSettings,
    #[serde(default)]
    pub devices: HashMap<String, DeviceSettings>,
    #[serde(default)]
    pub adapters: HashMap<String, AdapterSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BufferSettings {
    pub size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceSettings {
    pub uuid: String,
    #[serde(default)]
    pub data_items: Vec<DataItemSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataItemSettings {
    pub id: String,
    pub name: Option<String>,
    pub category: Category,
    pub r#type: String,
    pub sub_type: Option<String>,
    pub composition_id: Option<String>,
    #[serde(default)]
    pub representation: Representation,
    pub native_units: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdapterSettings {
    pub host: String,
    pub port: u16,
    /// Device key this adapter feeds (must be declared under `[devices]`).
    pub device: String,
    #[serde(with = "humantime_serde", default = "default_heartbeat")]
    pub heartbeat: Duration,
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    #[serde(default)]
    pub ignore_timestamps: bool,
    #[serde(default)]
    pub relative_time: bool,
    #[serde(default)]
    pub convert_units: bool,
    #[serde(default)]
    pub filter_duplicates: bool,
    #[serde(default)]
    pub available_on_connection: bool,
    #[serde(default)]
    pub ignore_heartbeat_on_change: bool,
    /// When set, adapter disconnect also marks every data item of the
    /// device UNAVAILABLE, not just the device's availability.
    #[serde(default)]
    pub mark_items_unavailable_on_disconnect: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(10)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(10)
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> AgentResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .add_source(config::Environment::with_prefix("MTC_AGENT").separator("__"))
            .build()
            .map_err(AgentError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(AgentError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from an explicit file path (tests, one-off deployments).
    pub fn from_file(path: &std::path::Path) -> AgentResult<Self> {
        let s = Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(AgentError::Config)?;
        let settings: Settings = s.try_deserialize().map_err(AgentError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.buffer.size == 0 {
            return Err(AgentError::Configuration(
                "buffer.size must be greater than zero".into(),
            ));
        }
        for (name, adapter) in &self.adapters {
            if !self.devices.contains_key(&adapter.device) {
                return Err(AgentError::Configuration(format!(
                    "adapter '{name}' references undeclared device '{}'",
                    adapter.device
                )));
            }
            if adapter.heartbeat.is_zero() {
                return Err(AgentError::Configuration(format!(
                    "adapter '{name}' heartbeat must be nonzero"
                )));
            }
            if adapter.connection_timeout.is_zero() || adapter.reconnect_interval.is_zero() {
                return Err(AgentError::Configuration(format!(
                    "adapter '{name}' timeouts must be nonzero"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
log_level = "debug"

[buffer]
size = 4096

[devices.mill-1]
uuid = "dev-uuid-1"
data_items = [
    { id = "avail", name = "avail", category = "EVENT", type = "AVAILABILITY" },
    { id = "x1", name = "Xact", category = "SAMPLE", type = "POSITION", native_units = "FAHRENHEIT" },
    { id = "temps", category = "SAMPLE", type = "TEMPERATURE", representation = "DATA_SET" },
]

[adapters.mill-1]
host = "127.0.0.1"
port = 7878
device = "mill-1"
heartbeat = "250ms"
connection_timeout = "2s"
reconnect_interval = "100ms"
filter_duplicates = true
available_on_connection = true
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn example_config_round_trips() {
        let file = write_config(EXAMPLE);
        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.buffer.size, 4096);
        let adapter = &settings.adapters["mill-1"];
        assert_eq!(adapter.heartbeat, Duration::from_millis(250));
        assert!(adapter.filter_duplicates);
        assert!(!adapter.ignore_timestamps);
        let items = &settings.devices["mill-1"].data_items;
        assert_eq!(items[2].representation, Representation::DataSet);
    }

    #[test]
    fn rejects_zero_buffer() {
        let file = write_config(
            r#"
[buffer]
size = 0
"#,
        );
        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_adapter_device() {
        let file = write_config(
            r#"
[buffer]
size = 16

[adapters.a]
host = "localhost"
port = 1
device = "ghost"
"#,
        );
        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
