use serde::{Deserialize, Serialize};
use srt::MountConfig;
use std::{path::PathBuf, time::Duration};
use tracking::Observer;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub serial: SerialConfig,
    pub observer: Observer,
    pub mount: MountConfig,
    pub acquisition: AcquisitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device of the mount controller, e.g. `/dev/ttyUSB0`.
    pub port: String,
    pub baud_rate: u32,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Program recording the spectra. Observations are refused without one.
    pub program: Option<PathBuf>,
    pub data_dir: PathBuf,
    /// Where student recordings go, `<data_dir>/student` if unset.
    pub student_dir: Option<PathBuf>,
    pub device_args: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            timeout_seconds: 120.0,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            program: None,
            data_dir: PathBuf::from("data"),
            student_dir: None,
            device_args: "hackrf=0,bias=1".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads `path` (optional), then `SRT__*` environment variables.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SRT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |e: String| config::ConfigError::Message(e);

        self.mount
            .validate()
            .map_err(|e| invalid(format!("mount.{}", e)))?;

        if Duration::try_from_secs_f64(self.serial.timeout_seconds).is_err() {
            return Err(invalid(format!(
                "serial.timeout_seconds must be a non-negative number of seconds, got {}",
                self.serial.timeout_seconds
            )));
        }

        Ok(())
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::from_secs(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt::BelowFloor;

    #[test]
    fn defaults_without_file() {
        let config = ServerConfig::load("does/not/exist").unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.mount.north_offset, 990000);
        assert_eq!(config.mount.below_floor, BelowFloor::Clamp);
        assert!(config.acquisition.program.is_none());
    }

    #[test]
    fn file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("srt-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[serial]
port = "/dev/ttyUSB0"

[observer]
latitude = 46.5194444
longitude = 6.565
altitude = 411.0

[mount]
elevation_floor = 10.0
below_floor = "reject"

[mount.keep_alive]
pause_while_tracking = true
"#,
        )
        .unwrap();

        let config = ServerConfig::load(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.observer.longitude, 6.565);
        assert_eq!(config.mount.elevation_floor, 10.0);
        assert_eq!(config.mount.below_floor, BelowFloor::Reject);
        assert!(config.mount.keep_alive.pause_while_tracking);
        assert_eq!(config.mount.keep_alive.interval_seconds, 60.0);
        assert_eq!(config.mount.tracking.lead_time_seconds, 15.0);
    }

    #[test]
    fn negative_periods_are_refused_at_load() {
        let path = std::env::temp_dir().join(format!("srt-config-bad-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[mount.tracking]
rate_seconds = -1.0
"#,
        )
        .unwrap();

        let result = ServerConfig::load(path.to_str().unwrap());
        std::fs::remove_file(&path).unwrap();

        let error = result.unwrap_err().to_string();
        assert!(error.contains("mount.tracking.rate_seconds"), "{}", error);
    }
}
