pub mod arbiter;
pub mod config;
pub mod gate;
pub mod keep_alive;
pub mod observation;
pub mod reporter;
pub mod supervisor;
pub mod tracker;

pub use arbiter::Arbiter;
pub use config::{BelowFloor, InvalidConfig, MountConfig};
pub use observation::{Acquisition, AcquisitionError, ExternalAcquisition, ObservationParams};
pub use supervisor::Srt;
pub use tracker::TrackerState;

use antenna_controller::{Feedback, LinkError};
use std::fmt;
use tracking::{Equatorial, Galactic, Horizontal, TrackingError};

/// Last known pointing of the mount, in every coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointingState {
    pub horizontal: Horizontal,
    pub equatorial: Equatorial,
    pub galactic: Galactic,
}

impl PointingState {
    /// Published when the mount could not be read back.
    pub const UNAVAILABLE: PointingState = PointingState {
        horizontal: Horizontal {
            azimuth: -1.0,
            elevation: -1.0,
        },
        equatorial: Equatorial { ra: -1.0, dec: -1.0 },
        galactic: Galactic {
            longitude: -1.0,
            latitude: -1.0,
        },
    };

    pub fn is_available(&self) -> bool {
        *self != Self::UNAVAILABLE
    }
}

impl Default for PointingState {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

/// `az alt ra dec long lat`, as broadcast to the client.
impl fmt::Display for PointingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} {:.4} {:.4} {:.4} {:.4} {:.4}",
            self.horizontal.azimuth,
            self.horizontal.elevation,
            self.equatorial.ra,
            self.equatorial.dec,
            self.galactic.longitude,
            self.galactic.latitude
        )
    }
}

/// Something the supervisor wants the operator to know.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Print(String),
    Warning(String),
    Error(String),
    Coords(PointingState),
    ObservationFinished { ok: bool },
}

/// What background producers hand over to the supervisor.
#[derive(Debug)]
pub(crate) enum Report {
    Position(PointingState),
    /// The tracker issued a slew and waits to be re-armed.
    Slewed {
        target: Horizontal,
        feedback: Feedback,
    },
    /// A satellite went below the floor.
    SatelliteLost,
    TrackingFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SrtError {
    #[error("SRT not connected")]
    NotConnected,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Coordinates(#[from] TrackingError),
    #[error("elevation {elevation:.2} is below the {floor:.2} degree floor")]
    BelowFloor { elevation: f64, floor: f64 },
    #[error("an observation is already running")]
    ObservationInProgress,
    #[error("no observation is running")]
    NoObservation,
    #[error("no acquisition program configured")]
    AcquisitionUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_line() {
        let state = PointingState {
            horizontal: Horizontal::new(180.0, 45.5),
            equatorial: Equatorial::new(83.633, 22.0145),
            galactic: Galactic::new(184.5575, -5.7843),
        };

        assert_eq!(
            state.to_string(),
            "180.0000 45.5000 83.6330 22.0145 184.5575 -5.7843"
        );
    }

    #[test]
    fn unavailable_is_all_minus_one() {
        assert_eq!(
            PointingState::UNAVAILABLE.to_string(),
            "-1.0000 -1.0000 -1.0000 -1.0000 -1.0000 -1.0000"
        );
        assert!(!PointingState::UNAVAILABLE.is_available());
    }
}
