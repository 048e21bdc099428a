pub mod mock;
pub mod serial;

use std::{fmt, io};

/// Separator between the status tag and the payload of a mount reply.
const SEPARATOR: &str = " | ";

/// Marker the firmware puts in front of the meaningful part of an error or warning.
const RETURNED_MARKER: &str = "APM returned ";

/// A request understood by the mount controller.
///
/// Every command is answered with exactly one `STATUS | PAYLOAD` line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// No-op that resets the controller's inactivity timer.
    Ping,
    /// Current azimuth, in degrees.
    GetAz,
    /// Current elevation, in degrees.
    GetElevation,
    /// Rotates back in azimuth to release the cabling.
    Untangle,
    /// Goes back to zenith and switches the motors off.
    StandBy,
    /// Azimuth reference offset, in microsteps.
    SetNorthOffset(i64),
    /// Slews to the given position, in degrees.
    PointTo { azimuth: f64, elevation: f64 },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => write!(f, "ping"),
            Command::GetAz => write!(f, "getAz"),
            Command::GetElevation => write!(f, "getElevation"),
            Command::Untangle => write!(f, "untangle"),
            Command::StandBy => write!(f, "stand_by"),
            Command::SetNorthOffset(offset) => write!(f, "set_north_offset {}", offset),
            Command::PointTo { azimuth, elevation } => {
                write!(f, "point_to {} {}", azimuth, elevation)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Warning,
    Error,
}

impl Status {
    fn classify(tag: &str) -> Self {
        if tag.contains("Err") {
            Status::Error
        } else if tag.contains("Warn") {
            Status::Warning
        } else {
            Status::Success
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::Warning => write!(f, "Warning"),
            Status::Error => write!(f, "Error"),
        }
    }
}

/// A parsed reply from the mount controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub status: Status,
    pub payload: String,
}

impl Feedback {
    pub fn new(status: Status, payload: impl Into<String>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }

    pub fn success(payload: impl Into<String>) -> Self {
        Self::new(Status::Success, payload)
    }

    /// Parses one reply line.
    ///
    /// The status tag is everything before the first `" | "`. Error and
    /// warning payloads only keep what follows the firmware's
    /// `"APM returned "` marker.
    pub fn parse(line: &str) -> Result<Self, LinkError> {
        let line = line.trim_end_matches(['\r', '\n']);

        let (tag, payload) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| LinkError::Malformed(line.to_string()))?;

        let status = Status::classify(tag);

        let payload = match status {
            Status::Success => payload,
            Status::Warning | Status::Error => {
                log::warn!("{} : {}", tag.trim(), payload.trim());
                payload.rsplit(RETURNED_MARKER).next().unwrap_or(payload)
            }
        };

        Ok(Self::new(status, payload.trim()))
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    /// Reads the payload as a numeric value, e.g. the answer to `getAz`.
    pub fn value(&self) -> Result<f64, LinkError> {
        if self.is_error() {
            return Err(LinkError::Malformed(self.payload.clone()));
        }

        self.payload
            .parse::<f64>()
            .map_err(|_| LinkError::Malformed(self.payload.clone()))
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.status, SEPARATOR, self.payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("APM not connected")]
    NotConnected,
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for the APM to answer")]
    Timeout,
    #[error("malformed reply from the APM: {0:?}")]
    Malformed(String),
}

impl LinkError {
    /// True when the failure comes from the channel itself rather than from
    /// the link simply being closed.
    pub fn is_transport(&self) -> bool {
        !matches!(self, LinkError::NotConnected)
    }
}

/// Request/response channel to a mount controller.
///
/// Implementations are not reentrant: callers guarantee that no two
/// `transact` calls overlap.
pub trait AntennaController: Send {
    /// Opens the channel.
    fn open(&mut self) -> Result<(), LinkError>;

    /// Closes the channel. Closing a closed channel does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Sends one command and waits for its reply.
    ///
    /// # Errors
    /// Returns [`LinkError::NotConnected`] when the channel is closed.
    fn transact(&mut self, command: &Command) -> Result<Feedback, LinkError>;
}

impl<T: AntennaController + ?Sized> AntennaController for Box<T> {
    fn open(&mut self) -> Result<(), LinkError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn transact(&mut self, command: &Command) -> Result<Feedback, LinkError> {
        (**self).transact(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines() {
        assert_eq!(Command::GetAz.to_string(), "getAz");
        assert_eq!(Command::StandBy.to_string(), "stand_by");
        assert_eq!(
            Command::SetNorthOffset(990000).to_string(),
            "set_north_offset 990000"
        );
        assert_eq!(
            Command::PointTo {
                azimuth: 180.0,
                elevation: 89.9
            }
            .to_string(),
            "point_to 180 89.9"
        );
    }

    #[test]
    fn parse_success_value() {
        let feedback = Feedback::parse("Success | 33.85\n").unwrap();

        assert_eq!(feedback.status, Status::Success);
        assert_eq!(feedback.payload, "33.85");
        assert_eq!(feedback.value().unwrap(), 33.85);
    }

    #[test]
    fn parse_error_strips_returned_marker() {
        let feedback =
            Feedback::parse("Error | Motion aborted, APM returned elevation out of range\r\n")
                .unwrap();

        assert_eq!(feedback.status, Status::Error);
        assert_eq!(feedback.payload, "elevation out of range");
    }

    #[test]
    fn parse_warning_without_marker_keeps_payload() {
        let feedback = Feedback::parse("Warning | encoder drift").unwrap();

        assert_eq!(feedback.status, Status::Warning);
        assert_eq!(feedback.payload, "encoder drift");
    }

    #[test]
    fn parse_splits_on_first_separator_only() {
        let feedback = Feedback::parse("Success | a | b").unwrap();

        assert_eq!(feedback.payload, "a | b");
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            Feedback::parse("garbage"),
            Err(LinkError::Malformed(_))
        ));
    }

    #[test]
    fn non_numeric_payload_is_not_a_value() {
        let feedback = Feedback::success("IDLE");

        assert!(matches!(feedback.value(), Err(LinkError::Malformed(_))));
    }

    #[test]
    fn not_connected_is_not_a_transport_failure() {
        assert!(!LinkError::NotConnected.is_transport());
        assert!(LinkError::Timeout.is_transport());
    }
}
