//! Follows a target across the sky.
//!
//! Every cycle computes where the target is, and slews there if it is above
//! the elevation floor. After a slew the tracker disables itself until the
//! supervisor calls [`Tracker::motion_complete`], so a slow mount is never
//! flooded with stale positions.
//!
//! Satellites are first anticipated: the tracker waits for the position
//! `lead_time` ahead to clear the floor, slews there, and only follows the
//! satellite continuously once that time has elapsed. A satellite setting
//! below the floor goes back to anticipation.

use crate::{Report, arbiter::Arbiter, config::TrackingConfig, gate::Gate};
use antenna_controller::Command;
use chrono::{DateTime, Utc};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracking::{Clock, CoordinateService, Horizontal, Target, TargetKind, TrackingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Active(TargetKind),
}

pub struct Tracker {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

struct Shared {
    gate: Gate,
    state: Mutex<TrackerState>,
    target: Mutex<Armed>,
    /// Bumped on every retarget or stop.
    changes: watch::Sender<u64>,
}

#[derive(Default)]
struct Armed {
    generation: u64,
    target: Option<Target>,
}

/// What one cycle does.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Skip,
    Slew(Horizontal),
    /// Slew to where a rising satellite will be.
    Anticipate(Horizontal),
    /// The satellite went below the floor.
    Lost,
}

struct Cycle {
    arbiter: Arc<Arbiter>,
    sky: Arc<dyn CoordinateService>,
    clock: Arc<dyn Clock>,
    config: TrackingConfig,
    floor: f64,
    reports: mpsc::UnboundedSender<Report>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn armed(&self) -> MutexGuard<'_, Armed> {
        self.target.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn changed(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Back to idle from inside a cycle.
    fn stop(&self) {
        let mut state = self.state();
        *state = TrackerState::Idle;
        self.gate.disable();
    }
}

impl Tracker {
    /// Spawns the tracker, idle.
    pub(crate) fn spawn(
        arbiter: Arc<Arbiter>,
        sky: Arc<dyn CoordinateService>,
        clock: Arc<dyn Clock>,
        config: TrackingConfig,
        floor: f64,
        reports: mpsc::UnboundedSender<Report>,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            gate: Gate::new("TRACKER"),
            state: Mutex::new(TrackerState::Idle),
            target: Mutex::new(Armed::default()),
            changes: watch::Sender::new(0),
        });

        let cycle = Cycle {
            arbiter,
            sky,
            clock,
            config,
            floor,
            reports,
        };

        let task = tokio::spawn(run(shared.clone(), cycle, cancel));

        Self { shared, task }
    }

    /// Replaces the target. The previous one is forgotten entirely.
    pub fn set_target(&self, target: Target) {
        {
            let mut armed = self.shared.armed();
            armed.generation += 1;
            armed.target = Some(target);
        }
        self.shared.changed();
    }

    /// Starts following the current target, if there is one.
    pub fn enable(&self) -> bool {
        let kind = match &self.shared.armed().target {
            Some(target) => target.kind(),
            None => return false,
        };

        let mut state = self.shared.state();
        *state = TrackerState::Active(kind);
        self.shared.gate.enable();
        log::info!("[TRACKER] tracking {}", kind);

        true
    }

    /// Stops tracking and waits until no slew is in flight.
    pub async fn disable(&self) {
        {
            let mut state = self.shared.state();
            if *state != TrackerState::Idle {
                log::info!("[TRACKER] stopped");
            }
            *state = TrackerState::Idle;
            self.shared.gate.disable();
        }
        self.shared.changed();

        self.shared.gate.idle().await;
    }

    /// Re-arms the tracker after the slew it issued has been handled.
    pub fn motion_complete(&self) {
        let state = self.shared.state();
        if matches!(*state, TrackerState::Active(_)) {
            self.shared.gate.enable();
        }
    }

    pub fn state(&self) -> TrackerState {
        *self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), TrackerState::Active(_))
    }

    pub fn is_pending(&self) -> bool {
        self.shared.gate.is_pending()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(shared: Arc<Shared>, cycle: Cycle, cancel: CancellationToken) {
    let mut generation = 0;
    let mut in_range = false;

    loop {
        let pending = tokio::select! {
            _ = cancel.cancelled() => break,
            pending = shared.gate.enter() => pending,
        };

        // Anything from here on cuts the lead time wait short.
        let mut changes = shared.changes.subscribe();
        let mut anticipating = false;

        let armed = {
            let armed = shared.armed();
            armed
                .target
                .clone()
                .map(|target| (armed.generation, target))
        };

        let mut wait = cycle.config.rate();

        if let Some((current, target)) = armed {
            if current != generation {
                generation = current;
                in_range = false;
            }

            let started = Instant::now();

            match cycle.plan(&target, cycle.clock.now(), in_range) {
                Ok(Step::Skip) => {}
                Ok(Step::Lost) => {
                    in_range = false;
                    log::info!("[TRACKER] satellite below {} degrees", cycle.floor);
                    let _ = cycle.reports.send(Report::SatelliteLost);
                }
                Ok(Step::Slew(position)) => {
                    cycle.slew(&shared, position).await;
                }
                Ok(Step::Anticipate(position)) => {
                    log::info!(
                        "[TRACKER] anticipating satellite at az {:.2} el {:.2}",
                        position.azimuth,
                        position.elevation
                    );

                    if cycle.slew(&shared, position).await {
                        in_range = true;
                        anticipating = true;
                        wait = wait.max(cycle.config.lead_time().saturating_sub(started.elapsed()));
                    }
                }
                Err(e) => {
                    log::error!("[TRACKER] cannot compute the target position: {}", e);
                    shared.stop();
                    let _ = cycle.reports.send(Report::TrackingFailed(e.to_string()));
                }
            }
        }

        drop(pending);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
            _ = changes.changed(), if anticipating => {
                log::debug!("[TRACKER] anticipation abandoned");
                in_range = false;
            }
        }
    }

    log::debug!("[TRACKER] stopped");
}

impl Cycle {
    fn plan(&self, target: &Target, now: DateTime<Utc>, in_range: bool) -> Result<Step, TrackingError> {
        if let (Target::Satellite(_), false) = (target, in_range) {
            let lead = chrono::Duration::from_std(self.config.lead_time())
                .unwrap_or(chrono::Duration::zero());
            let ahead = now + lead;
            let position = self.sky.horizontal(target, ahead)?;

            return Ok(if position.elevation < self.floor {
                Step::Skip
            } else {
                Step::Anticipate(position)
            });
        }

        let position = self.sky.horizontal(target, now)?;

        Ok(match (target, position.elevation < self.floor) {
            (Target::Satellite(_), true) => Step::Lost,
            (_, true) => Step::Skip,
            (_, false) => Step::Slew(position),
        })
    }

    /// Issues one slew. On success the tracker waits for `motion_complete`.
    async fn slew(&self, shared: &Shared, position: Horizontal) -> bool {
        let command = Command::PointTo {
            azimuth: position.azimuth,
            elevation: position.elevation,
        };

        let reason = match self.arbiter.execute(command).await {
            Ok(feedback) if !feedback.is_error() => {
                shared.gate.disable();
                let _ = self.reports.send(Report::Slewed {
                    target: position,
                    feedback,
                });
                return true;
            }
            Ok(feedback) => feedback.payload,
            Err(e) => e.to_string(),
        };

        log::error!("[TRACKER] slew failed: {}", reason);
        shared.stop();
        let _ = self.reports.send(Report::TrackingFailed(reason));

        false
    }
}
