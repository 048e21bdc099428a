use crate::PointingState;
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};
use tokio::process::Command;

/// Settings of one spectrum acquisition, as requested by the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationParams {
    /// Directory the data goes to, relative to the data directory unless absolute.
    pub repo: String,
    /// File name prefix of the recording.
    pub prefix: String,
    pub rf_gain: f64,
    pub if_gain: f64,
    pub bb_gain: f64,
    /// Center frequency, in Hz.
    pub center_frequency: f64,
    /// Bandwidth, in Hz.
    pub bandwidth: f64,
    pub channels: u32,
    /// Integration time of one spectrum, in seconds.
    pub sample_time: f64,
    /// Total duration, in seconds.
    pub duration: f64,
    /// Record the averaged spectra.
    pub obs_mode: bool,
    /// Record the raw samples.
    pub raw_mode: bool,
    /// Lab session recording, kept apart from the observatory data.
    pub student: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("cannot start the acquisition: {0}")]
    Spawn(#[from] io::Error),
    #[error("acquisition exited with {0}")]
    Failed(ExitStatus),
}

/// Something able to record spectra while the mount points somewhere.
#[async_trait]
pub trait Acquisition: Send + Sync {
    /// Runs one observation to completion.
    ///
    /// Dropping the returned future must stop the acquisition.
    async fn observe(
        &self,
        params: &ObservationParams,
        pointing: PointingState,
    ) -> Result<(), AcquisitionError>;
}

/// Runs an external acquisition program.
///
/// The program is called as `program <params.json> <spectra file> <raw file>`,
/// a file being `/dev/null` when its mode is off. The parameters are written
/// next to the data as `<prefix>_params.json`. Student recordings go under
/// their own directory, `<data dir>/student` unless set otherwise.
#[derive(Debug, Clone)]
pub struct ExternalAcquisition {
    program: PathBuf,
    data_dir: PathBuf,
    student_dir: PathBuf,
    device_args: String,
}

/// What is saved alongside the recording.
#[derive(Serialize)]
struct Record<'a> {
    dev_args: &'a str,
    rf_gain: f64,
    if_gain: f64,
    bb_gain: f64,
    frequency: f64,
    bandwidth: f64,
    channels: u32,
    t_sample: f64,
    duration: f64,
    az_alt: String,
    ra_dec: String,
}

const DISCARD: &str = "/dev/null";

impl ExternalAcquisition {
    pub fn new(
        program: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        device_args: impl Into<String>,
    ) -> Self {
        let data_dir = data_dir.into();

        Self {
            program: program.into(),
            student_dir: data_dir.join("student"),
            data_dir,
            device_args: device_args.into(),
        }
    }

    pub fn with_student_dir(mut self, student_dir: impl Into<PathBuf>) -> Self {
        self.student_dir = student_dir.into();
        self
    }

    /// Directory of the recording, created if missing.
    async fn repository(&self, repo: &str, student: bool) -> io::Result<PathBuf> {
        let repo = repo.trim_matches('/');
        let repo = if repo.is_empty() {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            repo.to_string()
        };

        let path = if Path::new(&repo).is_absolute() {
            PathBuf::from(repo)
        } else if student {
            self.student_dir.join(repo)
        } else {
            self.data_dir.join(repo)
        };

        if !path.is_dir() {
            log::info!("[OBSERVATION] creating repository {}", path.display());
            tokio::fs::create_dir_all(&path).await?;
        }

        Ok(path)
    }
}

/// `dir/prefix`, or `dir/prefix_(n)` when a recording by that name exists.
fn unique_stem(dir: &Path, prefix: &str) -> PathBuf {
    let prefix = prefix.trim_matches('/');
    let prefix = if prefix.is_empty() {
        Local::now().format("%Y_%m_%d_%H_%M_%S").to_string()
    } else {
        prefix.to_string()
    };

    let taken = |stem: &str| {
        dir.join(format!("{}.dat", stem)).exists()
            || dir.join(format!("{}_params.json", stem)).exists()
    };

    if !taken(&prefix) {
        return dir.join(prefix);
    }

    let mut copy = 1;
    while taken(&format!("{}_({})", prefix, copy)) {
        copy += 1;
    }

    dir.join(format!("{}_({})", prefix, copy))
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut path = stem.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

#[async_trait]
impl Acquisition for ExternalAcquisition {
    async fn observe(
        &self,
        params: &ObservationParams,
        pointing: PointingState,
    ) -> Result<(), AcquisitionError> {
        let dir = self.repository(&params.repo, params.student).await?;
        let stem = unique_stem(&dir, &params.prefix);

        let record = Record {
            dev_args: &self.device_args,
            rf_gain: params.rf_gain,
            if_gain: params.if_gain,
            bb_gain: params.bb_gain,
            frequency: params.center_frequency,
            bandwidth: params.bandwidth,
            channels: params.channels,
            t_sample: params.sample_time,
            duration: params.duration,
            az_alt: format!(
                "{:.4} {:.4}",
                pointing.horizontal.azimuth, pointing.horizontal.elevation
            ),
            ra_dec: format!("{:.4} {:.4}", pointing.equatorial.ra, pointing.equatorial.dec),
        };

        let record_path = with_suffix(&stem, "_params.json");
        let json = serde_json::to_vec_pretty(&record).map_err(io::Error::other)?;
        tokio::fs::write(&record_path, json).await?;

        let spectra = if params.obs_mode {
            with_suffix(&stem, ".dat")
        } else {
            PathBuf::from(DISCARD)
        };
        let raw = if params.raw_mode {
            with_suffix(&stem, "_raw.dat")
        } else {
            PathBuf::from(DISCARD)
        };

        log::info!(
            "[OBSERVATION] {} for {} s at {} MHz",
            stem.display(),
            params.duration,
            params.center_frequency / 1e6
        );

        let status = Command::new(&self.program)
            .arg(&record_path)
            .arg(&spectra)
            .arg(&raw)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            log::info!("[OBSERVATION] complete, data in {}", spectra.display());
            Ok(())
        } else {
            Err(AcquisitionError::Failed(status))
        }
    }
}
