use crate::{AntennaController, Command, Feedback, LinkError};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

/// Simulated mount controller.
///
/// Answers the whole command vocabulary the way the firmware does, keeps a
/// simulated pointing position and records every command it receives. A
/// [`MockHandle`] obtained before handing the controller over lets tests
/// inspect and steer it.
pub struct MockController {
    handle: MockHandle,
    open: bool,
}

#[derive(Debug)]
struct MockState {
    journal: Vec<String>,
    scripted: VecDeque<(String, String)>,
    delay: Duration,
    unresponsive: bool,
    azimuth: f64,
    elevation: f64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            journal: Vec::new(),
            scripted: VecDeque::new(),
            delay: Duration::ZERO,
            unresponsive: false,
            azimuth: 0.0,
            elevation: 90.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl MockController {
    pub fn new() -> Self {
        Self {
            handle: MockHandle::default(),
            open: false,
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn reply(state: &mut MockState, command: &Command) -> String {
        match command {
            Command::Ping => "Success | pong".to_string(),
            Command::GetAz => format!("Success | {:.2}", state.azimuth),
            Command::GetElevation => format!("Success | {:.2}", state.elevation),
            Command::Untangle => {
                state.azimuth = 0.0;
                "Success | IDLE".to_string()
            }
            Command::StandBy => {
                state.elevation = 90.0;
                "Success | IDLE".to_string()
            }
            Command::SetNorthOffset(_) => "Success | IDLE".to_string(),
            Command::PointTo { azimuth, elevation } => {
                state.azimuth = *azimuth;
                state.elevation = *elevation;
                "Success | IDLE".to_string()
            }
        }
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl AntennaController for MockController {
    fn open(&mut self) -> Result<(), LinkError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transact(&mut self, command: &Command) -> Result<Feedback, LinkError> {
        if !self.open {
            return Err(LinkError::NotConnected);
        }

        if self.handle.busy.swap(true, Ordering::SeqCst) {
            self.handle.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let line = command.to_string();
        let (delay, unresponsive) = {
            let mut state = self.handle.lock();
            state.journal.push(line.clone());
            (state.delay, state.unresponsive)
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let reply = {
            let mut state = self.handle.lock();
            let index = state
                .scripted
                .iter()
                .position(|(prefix, _)| line.starts_with(prefix.as_str()));
            let scripted = index.and_then(|index| state.scripted.remove(index));

            match scripted {
                Some((_, reply)) => reply,
                None => Self::reply(&mut state, command),
            }
        };

        log::debug!("[MOCK] {} -> {}", line, reply);
        self.handle.busy.store(false, Ordering::SeqCst);

        if unresponsive {
            return Err(LinkError::Timeout);
        }

        Feedback::parse(&reply)
    }
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every command line received so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// How many received commands start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Answers the next command starting with `prefix` with `reply` instead
    /// of the simulated behaviour.
    pub fn script(&self, prefix: &str, reply: &str) {
        self.lock()
            .scripted
            .push_back((prefix.to_string(), reply.to_string()));
    }

    /// Time every transaction takes.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Makes every transaction time out, as an unplugged cable would.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    pub fn set_position(&self, azimuth: f64, elevation: f64) {
        let mut state = self.lock();
        state.azimuth = azimuth;
        state.elevation = elevation;
    }

    pub fn position(&self) -> (f64, f64) {
        let state = self.lock();
        (state.azimuth, state.elevation)
    }

    /// Number of transactions that started while another one was running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;

    #[test]
    fn closed_mock_is_not_connected() {
        let mut mock = MockController::new();

        assert!(matches!(
            mock.transact(&Command::Ping),
            Err(LinkError::NotConnected)
        ));
        assert!(mock.handle().journal().is_empty());
    }

    #[test]
    fn simulates_pointing() {
        let mut mock = MockController::new();
        let handle = mock.handle();
        mock.open().unwrap();

        let feedback = mock
            .transact(&Command::PointTo {
                azimuth: 120.5,
                elevation: 42.0,
            })
            .unwrap();
        assert_eq!(feedback.payload, "IDLE");

        let az = mock.transact(&Command::GetAz).unwrap().value().unwrap();
        let el = mock.transact(&Command::GetElevation).unwrap().value().unwrap();

        assert_eq!((az, el), (120.5, 42.0));
        assert_eq!(handle.journal(), ["point_to 120.5 42", "getAz", "getElevation"]);
    }

    #[test]
    fn scripted_reply_is_used_once() {
        let mut mock = MockController::new();
        let handle = mock.handle();
        mock.open().unwrap();

        handle.script("point_to", "Error | APM returned target unreachable");

        let command = Command::PointTo {
            azimuth: 10.0,
            elevation: 10.0,
        };

        let first = mock.transact(&command).unwrap();
        assert_eq!(first.status, Status::Error);
        assert_eq!(first.payload, "target unreachable");

        let second = mock.transact(&command).unwrap();
        assert!(second.is_success());
    }

    #[test]
    fn unresponsive_mock_times_out() {
        let mut mock = MockController::new();
        let handle = mock.handle();
        mock.open().unwrap();

        handle.set_unresponsive(true);

        assert!(matches!(
            mock.transact(&Command::Ping),
            Err(LinkError::Timeout)
        ));
    }
}
