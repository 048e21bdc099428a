//! Text protocol spoken with the remote client.
//!
//! Every message, in both directions, starts with `&`. Several messages can
//! come in a single read, so each read is split on `&`. Server messages are
//! `STATUS|payload`.

use antenna_controller::{Feedback, Status};
use srt::{Event, ObservationParams};
use std::{fmt, str::FromStr};

pub const FRAME_START: char = '&';
const STATUS_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message without leading '&': {0:?}")]
    Unframed(String),
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{command}: expected {expected} arguments, got {got}")]
    Arity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{command}: invalid {argument} {value:?}")]
    Invalid {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
}

/// Splits one read into messages.
///
/// Text in front of the first `&` is not a message and comes out as
/// [`ProtocolError::Unframed`].
pub fn deframe(read: &str) -> impl Iterator<Item = Result<&str, ProtocolError>> {
    let mut parts = read.split(FRAME_START);

    let unframed = parts
        .next()
        .filter(|head| !head.trim().is_empty())
        .map(|head| Err(ProtocolError::Unframed(head.to_string())));

    unframed.into_iter().chain(
        parts
            .map(|message| message.trim_end_matches(['\r', '\n']))
            .filter(|message| !message.trim().is_empty())
            .map(Ok),
    )
}

/// Reassembles messages split across reads.
///
/// A message is complete once the next `&` or a newline arrives. The last
/// message of a burst has no such end and is taken with [`Deframer::flush`]
/// once the client has gone quiet.
#[derive(Debug, Default)]
pub struct Deframer {
    pending: String,
}

impl Deframer {
    /// Adds one read and returns the messages it completes.
    pub fn push(&mut self, read: &str) -> Vec<Result<String, ProtocolError>> {
        self.pending.push_str(read);

        let end = if self.pending.ends_with('\n') {
            self.pending.len()
        } else {
            self.pending.rfind(FRAME_START).unwrap_or(0)
        };

        let complete: String = self.pending.drain(..end).collect();
        collect(&complete)
    }

    /// Everything still waiting, the last message included.
    pub fn flush(&mut self) -> Vec<Result<String, ProtocolError>> {
        let rest = std::mem::take(&mut self.pending);
        collect(&rest)
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.trim().is_empty()
    }
}

fn collect(text: &str) -> Vec<Result<String, ProtocolError>> {
    deframe(text)
        .map(|message| message.map(str::to_string))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Connect,
    Disconnect,
    GoHome,
    Untangle,
    Standby,
    StopTracking,
    PointEquatorial { ra: f64, dec: f64 },
    PointGalactic { longitude: f64, latitude: f64 },
    PointAzAlt { azimuth: f64, elevation: f64 },
    TrackEquatorial { ra: f64, dec: f64 },
    TrackGalactic { longitude: f64, latitude: f64 },
    Measure(ObservationParams),
}

impl FromStr for ClientCommand {
    type Err = ProtocolError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let message = message.trim_start();
        let (name, rest) = message.split_once(' ').unwrap_or((message, ""));

        let command = match name {
            "connect" => ClientCommand::Connect,
            "disconnect" => ClientCommand::Disconnect,
            "goHome" => ClientCommand::GoHome,
            "untangle" => ClientCommand::Untangle,
            "standby" => ClientCommand::Standby,
            "stopTracking" => ClientCommand::StopTracking,
            "pointRA" => {
                let [ra, dec] = coordinates("pointRA", rest, ["ra", "dec"])?;
                ClientCommand::PointEquatorial { ra, dec }
            }
            "pointGal" => {
                let [longitude, latitude] =
                    coordinates("pointGal", rest, ["longitude", "latitude"])?;
                ClientCommand::PointGalactic {
                    longitude,
                    latitude,
                }
            }
            // A fixed horizontal position does not move: tracking it is pointing.
            "pointAzAlt" | "trackAzAlt" => {
                let [azimuth, elevation] =
                    coordinates("pointAzAlt", rest, ["azimuth", "elevation"])?;
                ClientCommand::PointAzAlt { azimuth, elevation }
            }
            "trackRA" => {
                let [ra, dec] = coordinates("trackRA", rest, ["ra", "dec"])?;
                ClientCommand::TrackEquatorial { ra, dec }
            }
            "trackGal" => {
                let [longitude, latitude] =
                    coordinates("trackGal", rest, ["longitude", "latitude"])?;
                ClientCommand::TrackGalactic {
                    longitude,
                    latitude,
                }
            }
            "measure" => ClientCommand::Measure(measure(rest)?),
            _ => return Err(ProtocolError::Unknown(name.to_string())),
        };

        Ok(command)
    }
}

fn number<T: FromStr>(
    command: &'static str,
    argument: &'static str,
    value: &str,
) -> Result<T, ProtocolError> {
    value.trim().parse().map_err(|_| ProtocolError::Invalid {
        command,
        argument,
        value: value.to_string(),
    })
}

fn coordinates(
    command: &'static str,
    args: &str,
    names: [&'static str; 2],
) -> Result<[f64; 2], ProtocolError> {
    let args: Vec<&str> = args.split_whitespace().collect();

    if args.len() != names.len() {
        return Err(ProtocolError::Arity {
            command,
            expected: names.len(),
            got: args.len(),
        });
    }

    Ok([
        number(command, names[0], args[0])?,
        number(command, names[1], args[1])?,
    ])
}

/// `0`/`1`, as the client sends its check boxes.
fn flag(argument: &'static str, value: &str) -> Result<bool, ProtocolError> {
    match value.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        _ => Err(ProtocolError::Invalid {
            command: "measure",
            argument,
            value: value.to_string(),
        }),
    }
}

/// `repo prefix rf if bb fc bw channels t_sample duration obs_mode raw_mode [student]`
///
/// Fields are separated by exactly one space so that an empty repository or
/// prefix keeps its place.
fn measure(args: &str) -> Result<ObservationParams, ProtocolError> {
    let fields: Vec<&str> = args.split(' ').collect();

    if !(12..=13).contains(&fields.len()) {
        return Err(ProtocolError::Arity {
            command: "measure",
            expected: 13,
            got: fields.len(),
        });
    }

    Ok(ObservationParams {
        repo: fields[0].to_string(),
        prefix: fields[1].to_string(),
        rf_gain: number("measure", "rf_gain", fields[2])?,
        if_gain: number("measure", "if_gain", fields[3])?,
        bb_gain: number("measure", "bb_gain", fields[4])?,
        center_frequency: number("measure", "center frequency", fields[5])?,
        bandwidth: number("measure", "bandwidth", fields[6])?,
        channels: number("measure", "channels", fields[7])?,
        sample_time: number("measure", "sample time", fields[8])?,
        duration: number("measure", "duration", fields[9])?,
        obs_mode: flag("obs_mode", fields[10])?,
        raw_mode: flag("raw_mode", fields[11])?,
        student: match fields.get(12) {
            Some(value) => flag("student", value)?,
            None => false,
        },
    })
}

/// A message to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Connected,
    Busy,
    Ok(String),
    Warning(String),
    Error(String),
    Print(String),
}

impl Reply {
    /// Motion complete: the client may send its next command.
    pub fn idle() -> Self {
        Reply::Ok("IDLE".to_string())
    }

    pub fn from_feedback(feedback: &Feedback) -> Self {
        match feedback.status {
            Status::Success => Reply::Ok(feedback.payload.clone()),
            Status::Warning => Reply::Warning(feedback.payload.clone()),
            Status::Error => Reply::Error(feedback.payload.clone()),
        }
    }

    pub fn from_event(event: &Event) -> Self {
        match event {
            Event::Print(text) => Reply::Print(text.clone()),
            Event::Warning(text) => Reply::Warning(text.clone()),
            Event::Error(text) => Reply::Error(text.clone()),
            Event::Coords(pointing) => Reply::Ok(format!("COORDS {}", pointing)),
            Event::ObservationFinished { ok: true } => {
                Reply::Ok("measurement_completed".to_string())
            }
            Event::ObservationFinished { ok: false } => {
                Reply::Error("measurement_failed".to_string())
            }
        }
    }
}

/// Payloads must not break the framing.
fn clean(payload: &str) -> String {
    payload.replace([FRAME_START, STATUS_SEPARATOR], " ")
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, payload) = match self {
            Reply::Connected => return write!(f, "{}CONNECTED", FRAME_START),
            Reply::Busy => return write!(f, "{}BUSY", FRAME_START),
            Reply::Ok(payload) => ("OK", payload),
            Reply::Warning(payload) => ("WARNING", payload),
            Reply::Error(payload) => ("ERROR", payload),
            Reply::Print(payload) => ("PRINT", payload),
        };

        write!(
            f,
            "{}{}{}{}",
            FRAME_START,
            status,
            STATUS_SEPARATOR,
            clean(payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srt::PointingState;

    #[test]
    fn concatenated_messages_are_split_in_order() {
        let messages: Vec<_> = deframe("&trackRA 10 20&stopTracking").collect();

        assert_eq!(messages, [Ok("trackRA 10 20"), Ok("stopTracking")]);
    }

    #[test]
    fn text_before_the_first_frame_is_unframed() {
        let messages: Vec<_> = deframe("garbage&connect").collect();

        assert_eq!(
            messages,
            [
                Err(ProtocolError::Unframed("garbage".to_string())),
                Ok("connect")
            ]
        );
    }

    #[test]
    fn read_without_frame_start_is_dropped() {
        let messages: Vec<_> = deframe("connect").collect();

        assert_eq!(
            messages,
            [Err(ProtocolError::Unframed("connect".to_string()))]
        );
    }

    #[test]
    fn empty_frames_are_skipped() {
        let messages: Vec<_> = deframe("&&goHome&\n").collect();

        assert_eq!(messages, [Ok("goHome")]);
    }

    #[test]
    fn motion_commands() {
        assert_eq!("goHome".parse::<ClientCommand>(), Ok(ClientCommand::GoHome));
        assert_eq!(
            "pointAzAlt 180.0 45.5".parse::<ClientCommand>(),
            Ok(ClientCommand::PointAzAlt {
                azimuth: 180.0,
                elevation: 45.5
            })
        );
        assert_eq!(
            "trackGal 30 -2".parse::<ClientCommand>(),
            Ok(ClientCommand::TrackGalactic {
                longitude: 30.0,
                latitude: -2.0
            })
        );
    }

    #[test]
    fn bad_arguments() {
        assert_eq!(
            "pointRA 10".parse::<ClientCommand>(),
            Err(ProtocolError::Arity {
                command: "pointRA",
                expected: 2,
                got: 1
            })
        );
        assert!(matches!(
            "trackRA ten 20".parse::<ClientCommand>(),
            Err(ProtocolError::Invalid { argument: "ra", .. })
        ));
        assert_eq!(
            "slew 1 2".parse::<ClientCommand>(),
            Err(ProtocolError::Unknown("slew".to_string()))
        );
    }

    #[test]
    fn measure_keeps_empty_fields() {
        let command: ClientCommand =
            "measure  cygnus 48.0 25.0 18.0 1420000000.0 2400000.0 2048 1.0 60.0 1 0 0"
                .parse()
                .unwrap();

        let ClientCommand::Measure(params) = command else {
            panic!("not a measurement");
        };

        assert_eq!(params.repo, "");
        assert_eq!(params.prefix, "cygnus");
        assert_eq!(params.center_frequency, 1420e6);
        assert_eq!(params.channels, 2048);
        assert!(params.obs_mode);
        assert!(!params.raw_mode);
        assert!(!params.student);
    }

    #[test]
    fn message_split_across_reads_is_reassembled() {
        let mut deframer = Deframer::default();

        assert!(deframer.push("&pointAzAlt 120 4").is_empty());
        assert!(deframer.is_pending());

        assert_eq!(
            deframer.push("5&stopTrack"),
            [Ok("pointAzAlt 120 45".to_string())]
        );
        assert_eq!(deframer.push("ing\n"), [Ok("stopTracking".to_string())]);
        assert!(!deframer.is_pending());
    }

    #[test]
    fn flush_hands_over_the_last_message() {
        let mut deframer = Deframer::default();

        assert_eq!(deframer.push("&connect&goHome"), [Ok("connect".to_string())]);
        assert_eq!(deframer.flush(), [Ok("goHome".to_string())]);
        assert!(deframer.flush().is_empty());

        deframer.push("no frame start");
        assert_eq!(
            deframer.flush(),
            [Err(ProtocolError::Unframed("no frame start".to_string()))]
        );
    }

    #[test]
    fn measure_needs_a_whole_channel_count() {
        for channels in ["-2048", "2048.5", "NaN"] {
            let message = format!(
                "measure night cygnus 48 25 18 1420000000 2400000 {} 1 60 1 0",
                channels
            );

            assert_eq!(
                message.parse::<ClientCommand>(),
                Err(ProtocolError::Invalid {
                    command: "measure",
                    argument: "channels",
                    value: channels.to_string(),
                })
            );
        }
    }

    #[test]
    fn replies_are_framed() {
        assert_eq!(Reply::Connected.to_string(), "&CONNECTED");
        assert_eq!(Reply::Busy.to_string(), "&BUSY");
        assert_eq!(Reply::idle().to_string(), "&OK|IDLE");
        assert_eq!(
            Reply::Error("a | b & c".to_string()).to_string(),
            "&ERROR|a   b   c"
        );
    }

    #[test]
    fn events_become_replies() {
        assert_eq!(
            Reply::from_event(&Event::Coords(PointingState::UNAVAILABLE)).to_string(),
            "&OK|COORDS -1.0000 -1.0000 -1.0000 -1.0000 -1.0000 -1.0000"
        );
        assert_eq!(
            Reply::from_event(&Event::ObservationFinished { ok: false }).to_string(),
            "&ERROR|measurement_failed"
        );
    }

    #[test]
    fn feedback_keeps_its_status() {
        let feedback = Feedback::new(Status::Warning, "encoder drift");

        assert_eq!(
            Reply::from_feedback(&feedback).to_string(),
            "&WARNING|encoder drift"
        );
    }
}
