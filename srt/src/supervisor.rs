use crate::{
    Event, PointingState, Report, SrtError,
    arbiter::Arbiter,
    config::{BelowFloor, MountConfig},
    keep_alive::KeepAlive,
    observation::{Acquisition, ObservationParams},
    reporter::{PositionReporter, read_pointing},
    tracker::{Tracker, TrackerState},
};
use antenna_controller::{AntennaController, Command, Feedback, LinkError, Status};
use std::sync::{
    Arc, MutexGuard, Weak,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracking::{Clock, CoordinateService, Equatorial, Galactic, Horizontal, Satellite, Target};

const EVENT_CAPACITY: usize = 256;

/// The mount as seen by the operator.
///
/// Owns the link through the [`Arbiter`] and the three background
/// producers. Foreground operations are serialised among themselves and
/// silence the keep-alive and the position reporter while they run.
pub struct Srt {
    config: MountConfig,
    arbiter: Arc<Arbiter>,
    sky: Arc<dyn CoordinateService>,
    clock: Arc<dyn Clock>,
    tracker: Tracker,
    keep_alive: KeepAlive,
    reporter: PositionReporter,
    pointing: watch::Sender<PointingState>,
    events: broadcast::Sender<Event>,
    /// Link open and one round trip completed.
    ready: AtomicBool,
    foreground: Mutex<()>,
    acquisition: Option<Arc<dyn Acquisition>>,
    observation: std::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Exclusive use of the mount for one foreground operation.
///
/// The keep-alive and the reporter are quiesced while it is held, and
/// re-enabled on drop if they were running and the mount is still ready.
struct Foreground<'a> {
    srt: &'a Srt,
    _lock: tokio::sync::MutexGuard<'a, ()>,
    keep_alive: bool,
    reporter: bool,
}

impl Foreground<'_> {
    /// Which producers run once the operation is over.
    fn resume(&mut self, keep_alive: bool, reporter: bool) {
        self.keep_alive = keep_alive;
        self.reporter = reporter;
    }
}

impl Drop for Foreground<'_> {
    fn drop(&mut self) {
        if !self.srt.ready.load(Ordering::SeqCst) {
            return;
        }

        if self.keep_alive {
            self.srt.keep_alive.gate().enable();
        }
        if self.reporter {
            self.srt.reporter.gate().enable();
        }
    }
}

impl Srt {
    /// Builds the supervisor and spawns its background tasks.
    ///
    /// Must be called from within a tokio runtime. Nothing is sent to the
    /// mount before [`Srt::connect_apm`].
    pub fn start(
        link: Box<dyn AntennaController>,
        sky: Arc<dyn CoordinateService>,
        clock: Arc<dyn Clock>,
        config: MountConfig,
        acquisition: Option<Arc<dyn Acquisition>>,
    ) -> Arc<Self> {
        if let Err(e) = config.validate() {
            log::warn!("[SRT] {}, falling back to the default", e);
        }

        let cancel = CancellationToken::new();
        let arbiter = Arc::new(Arbiter::new(link, config.max_consecutive_failures));
        let (reports, reports_rx) = mpsc::unbounded_channel();

        let keep_alive = KeepAlive::spawn(
            arbiter.clone(),
            config.keep_alive.interval(),
            cancel.clone(),
        );
        let reporter = PositionReporter::spawn(
            arbiter.clone(),
            sky.clone(),
            clock.clone(),
            config.reporter.interval(),
            reports.clone(),
            cancel.clone(),
        );
        let tracker = Tracker::spawn(
            arbiter.clone(),
            sky.clone(),
            clock.clone(),
            config.tracking.clone(),
            config.elevation_floor,
            reports,
            cancel.clone(),
        );

        let lost = arbiter.lost();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let srt = Arc::new(Self {
            config,
            arbiter,
            sky,
            clock,
            tracker,
            keep_alive,
            reporter,
            pointing: watch::Sender::new(PointingState::UNAVAILABLE),
            events,
            ready: AtomicBool::new(false),
            foreground: Mutex::new(()),
            acquisition,
            observation: std::sync::Mutex::new(None),
            cancel: cancel.clone(),
        });

        tokio::spawn(pump(Arc::downgrade(&srt), reports_rx, lost, cancel));

        srt
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Opens the link and runs the check-in routine: north calibration,
    /// untangling, optional water evacuation and a first position read.
    pub async fn connect_apm(&self, evacuate_water: bool) -> Result<Feedback, SrtError> {
        let mut fg = self.foreground().await;

        if self.arbiter.is_open() {
            log::warn!("[SRT] already connected");
            return Ok(Feedback::new(Status::Warning, "SRT already connected"));
        }

        self.arbiter.open().await?;

        match self.check_in(&fg, evacuate_water).await {
            Ok(feedback) => {
                fg.resume(true, true);
                self.print("SRT connected");
                Ok(feedback)
            }
            Err(e) => {
                self.ready.store(false, Ordering::SeqCst);
                self.arbiter.close().await;
                self.error(format!("connection failed: {}", e));
                Err(e)
            }
        }
    }

    /// Stops at the first error from the mount and returns it. Warnings
    /// do not stop the routine; the first one is returned.
    async fn check_in(&self, fg: &Foreground<'_>, evacuate_water: bool) -> Result<Feedback, SrtError> {
        self.print(format!(
            "Calibrating north offset to {}",
            self.config.north_offset
        ));
        let mut feedback = self
            .sequence(fg, &[
                Command::SetNorthOffset(self.config.north_offset),
                Command::Untangle,
            ])
            .await?;
        self.ready.store(true, Ordering::SeqCst);

        if evacuate_water && !feedback.is_error() {
            feedback = worse(feedback, self.evacuate_water(fg).await?);
        }

        self.refresh(fg).await;

        Ok(feedback)
    }

    /// Tilts the dish south so rain water flows out, then parks it.
    async fn evacuate_water(&self, fg: &Foreground<'_>) -> Result<Feedback, SrtError> {
        self.print("Evacuating water, tilting the dish south");
        let tilt = self
            .sequence(fg, &[
                Command::PointTo {
                    azimuth: 180.0,
                    elevation: 89.9,
                },
                Command::PointTo {
                    azimuth: 180.0,
                    elevation: self.config.elevation_floor,
                },
            ])
            .await?;

        if tilt.is_error() {
            return Ok(tilt);
        }

        tokio::time::sleep(self.config.water_dwell()).await;

        let park = self
            .sequence(fg, &[Command::Untangle, Command::StandBy])
            .await?;
        if !park.is_error() {
            self.print("Water evacuated, SRT ready");
        }

        Ok(worse(tilt, park))
    }

    /// Parks the mount and closes the link.
    pub async fn disconnect_apm(&self) -> Result<Feedback, SrtError> {
        if !self.arbiter.is_open() {
            log::warn!("[SRT] already disconnected");
            return Ok(Feedback::new(Status::Warning, "SRT already disconnected"));
        }

        self.halt_tracking().await;

        let mut fg = self.foreground().await;
        fg.resume(false, false);

        let parked = self.sequence(&fg, &[Command::Untangle, Command::StandBy]).await;

        self.ready.store(false, Ordering::SeqCst);
        self.keep_alive.gate().disable();
        self.reporter.gate().disable();
        self.arbiter.close().await;
        self.pointing.send_replace(PointingState::UNAVAILABLE);
        self.print("SRT disconnected");

        parked
    }

    /// Untangles the cables, then parks at zenith with the motors off.
    pub async fn go_home(&self) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.halt_tracking().await;

        let fg = self.foreground().await;
        let feedback = self
            .sequence(&fg, &[Command::Untangle, Command::StandBy])
            .await?;
        self.refresh(&fg).await;

        Ok(feedback)
    }

    pub async fn untangle(&self) -> Result<Feedback, SrtError> {
        self.motion(Command::Untangle).await
    }

    pub async fn standby(&self) -> Result<Feedback, SrtError> {
        self.motion(Command::StandBy).await
    }

    /// Sets the azimuth reference offset, in microsteps.
    pub async fn calibrate_north(&self, offset: i64) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.print(format!("Calibrating north offset to {}", offset));

        let fg = self.foreground().await;
        self.send(&fg, Command::SetNorthOffset(offset)).await
    }

    async fn motion(&self, command: Command) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.halt_tracking().await;

        let fg = self.foreground().await;
        let feedback = self.send(&fg, command).await?;
        self.refresh(&fg).await;

        Ok(feedback)
    }

    pub async fn point_az_alt(&self, azimuth: f64, elevation: f64) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.halt_tracking().await;

        let fg = self.foreground().await;
        self.point(&fg, Horizontal::new(azimuth, elevation)).await
    }

    pub async fn point_equatorial(&self, ra: f64, dec: f64) -> Result<Feedback, SrtError> {
        self.point_target(Target::Equatorial(Equatorial::new(ra, dec)))
            .await
    }

    pub async fn point_galactic(&self, longitude: f64, latitude: f64) -> Result<Feedback, SrtError> {
        self.point_target(Target::Galactic(Galactic::new(longitude, latitude)))
            .await
    }

    async fn point_target(&self, target: Target) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.halt_tracking().await;

        let fg = self.foreground().await;
        let position = self.sky.horizontal(&target, self.clock.now())?;
        self.point(&fg, position).await
    }

    pub async fn track_equatorial(&self, ra: f64, dec: f64) -> Result<Feedback, SrtError> {
        self.track(Target::Equatorial(Equatorial::new(ra, dec)))
            .await
    }

    pub async fn track_galactic(&self, longitude: f64, latitude: f64) -> Result<Feedback, SrtError> {
        self.track(Target::Galactic(Galactic::new(longitude, latitude)))
            .await
    }

    pub async fn track_satellite(&self, satellite: Satellite) -> Result<Feedback, SrtError> {
        self.track(Target::Satellite(Arc::new(satellite))).await
    }

    /// Points at `target`, then hands it over to the tracker.
    async fn track(&self, target: Target) -> Result<Feedback, SrtError> {
        self.ensure_connected()?;
        self.halt_tracking().await;

        let mut fg = self.foreground().await;
        let position = self.sky.horizontal(&target, self.clock.now())?;

        let feedback = match &target {
            Target::Satellite(satellite)
                if position.elevation < self.config.elevation_floor =>
            {
                self.print(format!(
                    "{} below {} degrees, waiting for it to rise",
                    satellite.name(),
                    self.config.elevation_floor
                ));
                Feedback::success("IDLE")
            }
            _ => self.point(&fg, position).await?,
        };

        if feedback.is_error() {
            return Ok(feedback);
        }

        let kind = target.kind();
        self.tracker.set_target(target);
        self.tracker.enable();

        if self.config.keep_alive.pause_while_tracking {
            fg.resume(false, true);
        }

        self.print(format!("Tracking in {} mode", kind));

        Ok(feedback)
    }

    /// Stops tracking. Returns once no slew from the tracker is in flight.
    pub async fn stop_tracking(&self) -> Feedback {
        self.halt_tracking().await;
        Feedback::success("IDLE")
    }

    async fn halt_tracking(&self) {
        let was_tracking = self.tracker.is_active();

        self.tracker.disable().await;

        if was_tracking {
            self.print("Tracking stopped");
            self.restore_keep_alive();
        }
    }

    fn restore_keep_alive(&self) {
        if self.config.keep_alive.pause_while_tracking && self.is_connected() {
            self.keep_alive.gate().enable();
        }
    }

    /// Folds and floors the elevation of a point request.
    fn aim(&self, position: Horizontal) -> Result<Horizontal, SrtError> {
        let floor = self.config.elevation_floor;
        let mut elevation = position.elevation;

        if !(0.0..=90.0).contains(&elevation) {
            elevation = elevation.rem_euclid(90.0);
        }

        if elevation < floor {
            match self.config.below_floor {
                BelowFloor::Clamp => {
                    self.warn(format!(
                        "elevation too low, safety lower bound is {} degrees",
                        floor
                    ));
                    elevation = floor;
                }
                BelowFloor::Reject => {
                    return Err(SrtError::BelowFloor {
                        elevation: position.elevation,
                        floor,
                    });
                }
            }
        }

        Ok(Horizontal::new(position.azimuth, elevation))
    }

    async fn point(&self, fg: &Foreground<'_>, position: Horizontal) -> Result<Feedback, SrtError> {
        let position = self.aim(position)?;

        log::info!(
            "[SRT] moving to az {:.2} el {:.2}",
            position.azimuth,
            position.elevation
        );

        let feedback = self
            .send(fg, Command::PointTo {
                azimuth: position.azimuth,
                elevation: position.elevation,
            })
            .await?;
        self.refresh(fg).await;

        Ok(feedback)
    }

    /// Sends commands in order, stopping at the first error from the mount.
    async fn sequence(&self, fg: &Foreground<'_>, commands: &[Command]) -> Result<Feedback, SrtError> {
        let mut feedback = Feedback::success("IDLE");

        for command in commands {
            feedback = worse(feedback, self.send(fg, command.clone()).await?);
            if feedback.is_error() {
                break;
            }
        }

        Ok(feedback)
    }

    async fn send(&self, _fg: &Foreground<'_>, command: Command) -> Result<Feedback, SrtError> {
        let feedback = self.arbiter.execute(command).await.map_err(|e| match e {
            LinkError::NotConnected => SrtError::NotConnected,
            e => SrtError::Link(e),
        })?;

        if feedback.is_error() {
            log::error!("[SRT] APM error: {}", feedback.payload);
        }

        Ok(feedback)
    }

    async fn refresh(&self, _fg: &Foreground<'_>) {
        let pointing = read_pointing(&self.arbiter, &*self.sky, self.clock.now()).await;
        self.publish(pointing);
    }

    fn publish(&self, pointing: PointingState) {
        self.pointing.send_replace(pointing);
        let _ = self.events.send(Event::Coords(pointing));
    }

    async fn foreground(&self) -> Foreground<'_> {
        let lock = self.foreground.lock().await;

        let keep_alive = self.keep_alive.gate().is_enabled();
        let reporter = self.reporter.gate().is_enabled();

        self.keep_alive.gate().quiesce().await;
        self.reporter.gate().quiesce().await;

        Foreground {
            srt: self,
            _lock: lock,
            keep_alive,
            reporter,
        }
    }

    fn ensure_connected(&self) -> Result<(), SrtError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SrtError::NotConnected)
        }
    }

    /// Launches an observation with the current pointing.
    pub fn start_observation(&self, params: ObservationParams) -> Result<(), SrtError> {
        let acquisition = self
            .acquisition
            .clone()
            .ok_or(SrtError::AcquisitionUnavailable)?;

        let mut slot = self.observation();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(SrtError::ObservationInProgress);
        }

        let pointing = self.pointing();
        let events = self.events.clone();

        *slot = Some(tokio::spawn(async move {
            let ok = match acquisition.observe(&params, pointing).await {
                Ok(()) => true,
                Err(e) => {
                    log::error!("[SRT] observation failed: {}", e);
                    let _ = events.send(Event::Error(format!("observation failed: {}", e)));
                    false
                }
            };

            let _ = events.send(Event::ObservationFinished { ok });
        }));

        self.print("Observation started");

        Ok(())
    }

    /// Kills the running observation. The data being recorded may be corrupted.
    pub fn stop_observation(&self) -> Result<(), SrtError> {
        let task = self.observation().take();

        match task {
            Some(task) if !task.is_finished() => {
                task.abort();
                self.warn("Observation killed, recorded data may be corrupted");
                Ok(())
            }
            _ => Err(SrtError::NoObservation),
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observation()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn observation(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.observation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last published pointing.
    pub fn pointing(&self) -> PointingState {
        *self.pointing.borrow()
    }

    pub fn watch_pointing(&self) -> watch::Receiver<PointingState> {
        self.pointing.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.arbiter.is_open() && self.ready.load(Ordering::SeqCst)
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_active()
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Parks the mount if connected and stops the background tasks.
    pub async fn shutdown(&self) {
        if self.is_observing() {
            let _ = self.stop_observation();
        }

        if self.arbiter.is_open() {
            if let Err(e) = self.disconnect_apm().await {
                log::error!("[SRT] parking on shutdown failed: {}", e);
            }
        }

        self.cancel.cancel();
    }

    fn print(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("[SRT] {}", message);
        let _ = self.events.send(Event::Print(message));
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[SRT] {}", message);
        let _ = self.events.send(Event::Warning(message));
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("[SRT] {}", message);
        let _ = self.events.send(Event::Error(message));
    }

    async fn handle(&self, report: Report) {
        match report {
            Report::Position(pointing) => self.publish(pointing),
            Report::Slewed { target, feedback } => {
                log::debug!(
                    "[SRT] tracker slewed to az {:.2} el {:.2}: {}",
                    target.azimuth,
                    target.elevation,
                    feedback
                );

                if feedback.status == Status::Warning {
                    self.warn(feedback.payload);
                }

                {
                    let fg = self.foreground().await;
                    self.refresh(&fg).await;
                }

                self.tracker.motion_complete();
            }
            Report::SatelliteLost => {
                self.print("Satellite below the horizon, waiting for it to rise again");
            }
            Report::TrackingFailed(reason) => {
                self.error(format!("Tracking stopped: {}", reason));
                self.restore_keep_alive();
            }
        }
    }

    async fn connection_lost(&self) {
        if !self.arbiter.is_open() {
            return;
        }

        self.ready.store(false, Ordering::SeqCst);
        self.keep_alive.gate().disable();
        self.reporter.gate().disable();
        self.tracker.disable().await;
        self.arbiter.close().await;
        self.pointing.send_replace(PointingState::UNAVAILABLE);

        self.error("Connection to the APM lost");
    }
}

impl Drop for Srt {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps the first warning unless `then` is an error.
fn worse(first: Feedback, then: Feedback) -> Feedback {
    if first.is_success() || then.is_error() {
        then
    } else {
        first
    }
}

/// Hands producer reports and link loss over to the supervisor.
async fn pump(
    srt: Weak<Srt>,
    mut reports: mpsc::UnboundedReceiver<Report>,
    mut lost: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            report = reports.recv() => {
                let (Some(report), Some(srt)) = (report, srt.upgrade()) else {
                    break;
                };
                srt.handle(report).await;
            }
            changed = lost.changed() => {
                if changed.is_err() {
                    break;
                }

                let is_lost = *lost.borrow_and_update();
                if is_lost {
                    match srt.upgrade() {
                        Some(srt) => srt.connection_lost().await,
                        None => break,
                    }
                }
            }
        }
    }

    log::debug!("[SRT] report pump stopped");
}
