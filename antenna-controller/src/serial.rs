use crate::{AntennaController, Command, Feedback, LinkError};
use serialport::{ClearBuffer, SerialPort};
use std::{
    io::{self, Read, Write},
    time::Duration,
};

/// Longest reply line accepted before giving up on the framing.
const MAX_LINE: usize = 256;

/// A controller for the mount, talking the line protocol over a serial port.
///
/// The port is only opened by [`AntennaController::open`], so the instance
/// can be created while the mount is still powered off.
pub struct SerialAntennaController {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAntennaController {
    /// Creates a new `SerialAntennaController` for the specified port name and baud rate.
    pub fn new(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            port: None,
        }
    }

    fn read_line(port: &mut dyn SerialPort) -> Result<String, LinkError> {
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];

        loop {
            match port.read(&mut byte) {
                Ok(0) => return Err(LinkError::Io(io::ErrorKind::UnexpectedEof.into())),
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(LinkError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Io(e)),
            }

            if line.len() > MAX_LINE {
                return Err(LinkError::Malformed(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            }
        }

        String::from_utf8(line).map_err(|e| {
            LinkError::Malformed(String::from_utf8_lossy(e.as_bytes()).into_owned())
        })
    }
}

impl AntennaController for SerialAntennaController {
    fn open(&mut self) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()?;

        log::info!("Opened {} at {} baud", self.port_name, self.baud_rate);
        self.port = Some(port);

        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed {}", self.port_name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn transact(&mut self, command: &Command) -> Result<Feedback, LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;

        // Leftovers from an earlier timed-out exchange would be read as this reply.
        port.clear(ClearBuffer::Input)?;

        let line = format!("{}\n", command);
        port.write_all(line.as_bytes())?;
        port.flush()?;

        let reply = Self::read_line(port.as_mut())?;
        log::trace!("{} -> {}", command, reply);

        Feedback::parse(&reply)
    }
}
