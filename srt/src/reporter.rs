use crate::{PointingState, Report, arbiter::Arbiter, gate::Gate};
use antenna_controller::{Command, LinkError};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracking::{Clock, CoordinateService, Horizontal};

/// Reads the mount position back and hands it to the supervisor.
pub struct PositionReporter {
    gate: Arc<Gate>,
    task: JoinHandle<()>,
}

impl PositionReporter {
    /// Spawns the producer, disabled.
    pub(crate) fn spawn(
        arbiter: Arc<Arbiter>,
        sky: Arc<dyn CoordinateService>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        reports: mpsc::UnboundedSender<Report>,
        cancel: CancellationToken,
    ) -> Self {
        let gate = Arc::new(Gate::new("REPORTER"));

        let task = tokio::spawn({
            let gate = gate.clone();
            async move {
                loop {
                    // The guard is released before reporting: the supervisor
                    // may be quiescing us while it handles the report.
                    let pointing = match gate.try_enter() {
                        Some(_pending) => Some(read_pointing(&arbiter, &*sky, clock.now()).await),
                        None => None,
                    };

                    if let Some(pointing) = pointing {
                        if reports.send(Report::Position(pointing)).is_err() {
                            break;
                        }
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }

                log::debug!("[REPORTER] stopped");
            }
        });

        Self { gate, task }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Reads azimuth and elevation and derives the sky coordinates.
///
/// Any failure yields [`PointingState::UNAVAILABLE`].
pub async fn read_pointing(
    arbiter: &Arbiter,
    sky: &dyn CoordinateService,
    at: DateTime<Utc>,
) -> PointingState {
    match read_horizontal(arbiter).await {
        Ok(horizontal) => PointingState {
            horizontal,
            equatorial: sky.equatorial(horizontal, at),
            galactic: sky.galactic(horizontal, at),
        },
        Err(e) => {
            log::warn!("[REPORTER] could not read the position: {}", e);
            PointingState::UNAVAILABLE
        }
    }
}

async fn read_horizontal(arbiter: &Arbiter) -> Result<Horizontal, LinkError> {
    let azimuth = arbiter.execute(Command::GetAz).await?.value()?;
    let elevation = arbiter.execute(Command::GetElevation).await?.value()?;

    Ok(Horizontal::new(azimuth, elevation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use antenna_controller::mock::MockController;
    use tracking::{FixedClock, Observer, Sky};

    fn sky() -> Sky {
        Sky::new(Observer::new(46.5194444, 6.565, 411.0))
    }

    #[tokio::test]
    async fn reads_back_the_mount() {
        let mock = MockController::new();
        let handle = mock.handle();
        let arbiter = Arbiter::new(Box::new(mock), 5);
        arbiter.open().await.unwrap();
        handle.set_position(123.45, 67.89);

        let pointing = read_pointing(&arbiter, &sky(), Utc::now()).await;

        assert_eq!(pointing.horizontal, Horizontal::new(123.45, 67.89));
        assert!(pointing.is_available());
    }

    #[tokio::test]
    async fn unparsable_reply_is_unavailable() {
        let mock = MockController::new();
        let handle = mock.handle();
        let arbiter = Arbiter::new(Box::new(mock), 5);
        arbiter.open().await.unwrap();
        handle.script("getElevation", "Success | moving");

        let pointing = read_pointing(&arbiter, &sky(), Utc::now()).await;

        assert_eq!(pointing, PointingState::UNAVAILABLE);
    }

    #[tokio::test]
    async fn closed_link_is_unavailable() {
        let arbiter = Arbiter::new(Box::new(MockController::new()), 5);

        let pointing = read_pointing(&arbiter, &sky(), Utc::now()).await;

        assert_eq!(pointing, PointingState::UNAVAILABLE);
    }

    #[tokio::test]
    async fn reports_periodically_while_enabled() {
        let mock = MockController::new();
        let arbiter = Arc::new(Arbiter::new(Box::new(mock), 5));
        arbiter.open().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reporter = PositionReporter::spawn(
            arbiter,
            Arc::new(sky()),
            Arc::new(FixedClock(Utc::now())),
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        );

        reporter.gate().enable();

        for _ in 0..3 {
            match rx.recv().await {
                Some(Report::Position(pointing)) => {
                    assert_eq!(pointing.horizontal, Horizontal::new(0.0, 90.0))
                }
                other => panic!("unexpected report {:?}", other),
            }
        }

        cancel.cancel();
    }
}
