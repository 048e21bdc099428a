pub mod satellite;
pub mod sky;
pub mod time;

pub use satellite::Satellite;
pub use sky::Sky;
pub use time::{Clock, FixedClock, SystemClock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub type Degrees = f64;
pub type Meters = f64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    /// Site latitude, in degrees.
    pub latitude: Degrees,
    /// Site longitude, in degrees, positive east.
    pub longitude: Degrees,
    /// Site altitude, in meters.
    pub altitude: Meters,
}

/// The Ecublens site.
impl Default for Observer {
    fn default() -> Self {
        Self::new(46.5194444, 6.565, 411.0)
    }
}

impl Observer {
    pub fn new(latitude: Degrees, longitude: Degrees, altitude: Meters) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// A direction in the local horizontal frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Horizontal {
    /// Azimuth from north through east, in degrees.
    pub azimuth: Degrees,
    /// Elevation above the horizon, in degrees.
    pub elevation: Degrees,
}

impl Horizontal {
    pub fn new(azimuth: Degrees, elevation: Degrees) -> Self {
        Self {
            azimuth,
            elevation,
        }
    }
}

/// Right ascension and declination, both in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Equatorial {
    pub ra: Degrees,
    pub dec: Degrees,
}

impl Equatorial {
    pub fn new(ra: Degrees, dec: Degrees) -> Self {
        Self { ra, dec }
    }
}

/// Galactic longitude and latitude, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Galactic {
    pub longitude: Degrees,
    pub latitude: Degrees,
}

impl Galactic {
    pub fn new(longitude: Degrees, latitude: Degrees) -> Self {
        Self {
            longitude,
            latitude,
        }
    }
}

/// Something the mount can follow across the sky.
#[derive(Debug, Clone)]
pub enum Target {
    Equatorial(Equatorial),
    Galactic(Galactic),
    Satellite(Arc<Satellite>),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Equatorial(_) => TargetKind::Equatorial,
            Target::Galactic(_) => TargetKind::Galactic,
            Target::Satellite(_) => TargetKind::Satellite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Equatorial,
    Galactic,
    Satellite,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Equatorial => write!(f, "RaDec"),
            TargetKind::Galactic => write!(f, "Galactic"),
            TargetKind::Satellite => write!(f, "Satellite"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("invalid TLE: {0:?}")]
    Tle(sgp4::TleError),
    #[error("invalid orbital elements: {0:?}")]
    Elements(sgp4::ElementsError),
    #[error("orbit prediction failed: {0:?}")]
    Prediction(predict_rs::orbit::OrbitPredictionError),
}

/// Conversions between the mount's horizontal frame and the sky.
///
/// Implementations are pure functions of their inputs and of the given time.
pub trait CoordinateService: Send + Sync {
    /// Where `target` is seen from the site at `at`.
    fn horizontal(&self, target: &Target, at: DateTime<Utc>) -> Result<Horizontal, TrackingError>;

    fn equatorial(&self, position: Horizontal, at: DateTime<Utc>) -> Equatorial;

    fn galactic(&self, position: Horizontal, at: DateTime<Utc>) -> Galactic;
}
