use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Azimuth reference offset of the mount, in microsteps.
pub const NORTH_OFFSET: i64 = 990000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Offset sent with `set_north_offset` at connection.
    pub north_offset: i64,
    /// Lowest elevation the mount may be commanded to, in degrees.
    pub elevation_floor: f64,
    /// What a point request below the floor does.
    pub below_floor: BelowFloor,
    /// Whether `connect` runs the water evacuation sequence.
    pub evacuate_water: bool,
    /// How long the dish stays tilted during water evacuation.
    pub water_dwell_seconds: f64,
    /// Transport failures in a row after which the link is declared lost.
    pub max_consecutive_failures: u32,
    pub keep_alive: KeepAliveConfig,
    pub tracking: TrackingConfig,
    pub reporter: ReporterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BelowFloor {
    /// Raise the elevation to the floor and warn.
    Clamp,
    /// Refuse the request.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub interval_seconds: f64,
    /// Stop pinging while the tracker is active.
    ///
    /// Tracking already keeps the controller busy, but a tracker waiting
    /// for a target to rise sends nothing and the controller parks itself
    /// after its inactivity delay.
    pub pause_while_tracking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum delay between two tracking cycles.
    pub rate_seconds: f64,
    /// How far ahead a rising satellite is anticipated.
    pub lead_time_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub interval_seconds: f64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            north_offset: NORTH_OFFSET,
            elevation_floor: 5.0,
            below_floor: BelowFloor::Clamp,
            evacuate_water: true,
            water_dwell_seconds: 15.0,
            max_consecutive_failures: 5,
            keep_alive: KeepAliveConfig::default(),
            tracking: TrackingConfig::default(),
            reporter: ReporterConfig::default(),
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60.0,
            pause_while_tracking: false,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            rate_seconds: 0.1,
            lead_time_seconds: 15.0,
        }
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidConfig {
    #[error("{name} must be a non-negative number of seconds, got {value}")]
    Duration { name: &'static str, value: f64 },
    #[error("elevation_floor must be within [0, 90] degrees, got {0}")]
    ElevationFloor(f64),
}

/// `value` seconds, or `fallback` when `value` is not a valid duration.
fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

fn check_seconds(name: &'static str, value: f64) -> Result<(), InvalidConfig> {
    match Duration::try_from_secs_f64(value) {
        Ok(_) => Ok(()),
        Err(_) => Err(InvalidConfig::Duration { name, value }),
    }
}

impl MountConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if !(0.0..=90.0).contains(&self.elevation_floor) {
            return Err(InvalidConfig::ElevationFloor(self.elevation_floor));
        }

        check_seconds("water_dwell_seconds", self.water_dwell_seconds)?;
        check_seconds("keep_alive.interval_seconds", self.keep_alive.interval_seconds)?;
        check_seconds("tracking.rate_seconds", self.tracking.rate_seconds)?;
        check_seconds("tracking.lead_time_seconds", self.tracking.lead_time_seconds)?;
        check_seconds("reporter.interval_seconds", self.reporter.interval_seconds)
    }

    pub fn water_dwell(&self) -> Duration {
        seconds(self.water_dwell_seconds, 15.0)
    }
}

impl KeepAliveConfig {
    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds, 60.0)
    }
}

impl TrackingConfig {
    pub fn rate(&self) -> Duration {
        seconds(self.rate_seconds, 0.1)
    }

    pub fn lead_time(&self) -> Duration {
        seconds(self.lead_time_seconds, 15.0)
    }
}

impl ReporterConfig {
    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds, 3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(MountConfig::default().validate(), Ok(()));
    }

    #[test]
    fn bad_durations_are_refused() {
        let config = MountConfig {
            tracking: TrackingConfig {
                rate_seconds: -0.1,
                ..TrackingConfig::default()
            },
            ..MountConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(InvalidConfig::Duration {
                name: "tracking.rate_seconds",
                value: -0.1
            })
        );
        assert_eq!(config.tracking.rate(), Duration::from_millis(100));

        let config = MountConfig {
            reporter: ReporterConfig {
                interval_seconds: f64::NAN,
            },
            ..MountConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.reporter.interval(), Duration::from_secs(3));
    }

    #[test]
    fn floor_must_be_an_elevation() {
        let config = MountConfig {
            elevation_floor: 95.0,
            ..MountConfig::default()
        };

        assert_eq!(config.validate(), Err(InvalidConfig::ElevationFloor(95.0)));
    }
}
