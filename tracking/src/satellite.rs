use crate::{Horizontal, Observer, TrackingError};
use chrono::{DateTime, Utc};
use predict_rs::{
    consts::{DEG_TO_RAD, RAD_TO_DEG},
    observer, orbit,
    predict::PredictObserver,
};
use std::fmt;

/// An Earth satellite described by its orbital elements.
///
/// The SGP4 constants are derived once, so the satellite can be observed at
/// any rate without reparsing the elements.
pub struct Satellite {
    elements: sgp4::Elements,
    constants: sgp4::Constants,
}

impl Satellite {
    pub fn new(elements: sgp4::Elements) -> Result<Self, TrackingError> {
        let constants =
            sgp4::Constants::from_elements(&elements).map_err(TrackingError::Elements)?;

        Ok(Self {
            elements,
            constants,
        })
    }

    /// Builds a satellite from the two lines of a TLE set.
    pub fn from_tle(name: Option<String>, line1: &str, line2: &str) -> Result<Self, TrackingError> {
        let elements = sgp4::Elements::from_tle(name, line1.as_bytes(), line2.as_bytes())
            .map_err(TrackingError::Tle)?;

        Self::new(elements)
    }

    pub fn name(&self) -> &str {
        self.elements.object_name.as_deref().unwrap_or("unnamed")
    }

    pub fn norad_id(&self) -> u64 {
        self.elements.norad_id
    }

    /// Where the satellite is seen from `site` at `at`.
    pub fn observe(
        &self,
        site: &PredictObserver,
        at: DateTime<Utc>,
    ) -> Result<Horizontal, TrackingError> {
        let unix = at.timestamp_millis() as f64 / 1000.0;

        let orbit = orbit::predict_orbit(&self.elements, &self.constants, unix)
            .map_err(TrackingError::Prediction)?;

        let observation = observer::predict_observe_orbit(site, &orbit);

        Ok(Horizontal {
            azimuth: observation.azimuth * RAD_TO_DEG,
            elevation: observation.elevation * RAD_TO_DEG,
        })
    }
}

impl fmt::Debug for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Satellite")
            .field("name", &self.name())
            .field("norad_id", &self.norad_id())
            .finish()
    }
}

/// The observing site in the form the orbit predictor expects.
pub(crate) fn predict_site(site: &Observer) -> PredictObserver {
    PredictObserver {
        name: "".to_string(),
        latitude: site.latitude * DEG_TO_RAD,
        longitude: site.longitude * DEG_TO_RAD,
        altitude: site.altitude,
        min_elevation: 0.0,
    }
}
