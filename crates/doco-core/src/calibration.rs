//! Travel-time calibration
//!
//! The estimator divides elapsed time by the time a door needs for one full
//! traversal. Those durations are measured once per door by driving it
//! between its limit switches and are kept in a small JSON file keyed by
//! door id:
//!
//! ```json
//! { "garage": { "open_time": 12.4, "close_time": 12.1, "measured_at": "..." } }
//! ```
//!
//! A door that is absent from the file, or whose entry lacks one direction,
//! is measured again at startup. Measured results are written back; the file
//! is left untouched when nothing was measured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::door::{DoorConfig, DoorId, MovementCommand, SensorSample};
use crate::gpio::{pulse, read_sample, DigitalIo, GpioError};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),
    #[error("Door {door} did not reach {target} within {waited:?}")]
    Timeout {
        door: DoorId,
        target: &'static str,
        waited: Duration,
    },
}

/// Calibrated traversal durations of one door, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelTimes {
    #[serde(default)]
    pub open_time: Option<f64>,
    #[serde(default)]
    pub close_time: Option<f64>,
    /// When the measurement was taken (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_at: Option<String>,
}

impl TravelTimes {
    /// Travel time for a direction, if it is usable as a divisor
    pub fn for_direction(&self, command: MovementCommand) -> Option<f64> {
        let value = match command {
            MovementCommand::Open => self.open_time,
            MovementCommand::Close => self.close_time,
            _ => None,
        };
        value.filter(|t| t.is_finite() && *t > 0.0)
    }

    pub fn is_complete(&self) -> bool {
        self.for_direction(MovementCommand::Open).is_some()
            && self.for_direction(MovementCommand::Close).is_some()
    }
}

/// All calibrated doors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationData {
    pub doors: BTreeMap<DoorId, TravelTimes>,
}

impl CalibrationData {
    pub fn get(&self, id: &DoorId) -> Option<&TravelTimes> {
        self.doors.get(id)
    }

    pub fn insert(&mut self, id: DoorId, times: TravelTimes) {
        self.doors.insert(id, times);
    }
}

/// Timing parameters of a measurement run
#[derive(Debug, Clone, Copy)]
pub struct MeasureSettings {
    /// Length of the actuator pulse
    pub pulse: Duration,
    /// Interval between limit switch reads
    pub poll_interval: Duration,
    /// Longest wait for any single traversal
    pub timeout: Duration,
}

impl Default for MeasureSettings {
    fn default() -> Self {
        Self {
            pulse: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Calibration file manager
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    pub path: PathBuf,
    pub data: CalibrationData,
}

impl CalibrationStore {
    /// Load the calibration file, or start empty if it doesn't exist
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            CalibrationData::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Write the calibration file
    pub fn save(&self) -> Result<(), CalibrationError> {
        let content = serde_json::to_string_pretty(&self.data)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Travel times for a door; empty when it was never calibrated
    pub fn travel_times(&self, id: &DoorId) -> TravelTimes {
        self.data.get(id).cloned().unwrap_or_default()
    }

    /// Doors among `doors` that need a measurement run
    pub fn pending<'a>(&self, doors: &'a [DoorConfig], force: bool) -> Vec<&'a DoorConfig> {
        doors
            .iter()
            .filter(|d| d.enabled)
            .filter(|d| force || !self.data.get(&d.id).is_some_and(|t| t.is_complete()))
            .collect()
    }

    /// Measure every door that lacks a complete calibration and persist the
    /// results. Returns the number of doors measured.
    ///
    /// A door whose measurement fails is logged and left uncalibrated; the
    /// remaining doors are still measured.
    pub async fn calibrate(
        &mut self,
        doors: &[DoorConfig],
        io: &dyn DigitalIo,
        settings: &MeasureSettings,
        force: bool,
    ) -> Result<usize, CalibrationError> {
        let mut measured = 0;
        for door in self.pending(doors, force) {
            info!(door = %door.id, "Measuring travel times");
            match measure(door, io, settings).await {
                Ok(times) => {
                    info!(
                        door = %door.id,
                        open_time = times.open_time.unwrap_or_default(),
                        close_time = times.close_time.unwrap_or_default(),
                        "Calibration complete"
                    );
                    self.data.insert(door.id.clone(), times);
                    measured += 1;
                }
                Err(e) => {
                    warn!(
                        door = %door.id,
                        error = %e,
                        "Calibration failed, door stays uncalibrated"
                    );
                }
            }
        }

        if measured > 0 {
            self.save()?;
            info!(path = %self.path.display(), doors = measured, "Saved calibration");
        }
        Ok(measured)
    }
}

/// Drive a door through a full open/close cycle and time both traversals.
///
/// The door is first brought to the closed position so the open run always
/// starts from a known end of travel.
pub async fn measure(
    door: &DoorConfig,
    io: &dyn DigitalIo,
    settings: &MeasureSettings,
) -> Result<TravelTimes, CalibrationError> {
    let sample = read_sample(io, door)?;
    if !reached(MovementCommand::Close, &sample) {
        debug!(door = %door.id, "Driving to closed baseline");
        pulse(io, door.pin_for(MovementCommand::Close), settings.pulse).await?;
        wait_for(door, io, settings, MovementCommand::Close).await?;
    }

    let open_time = traverse(door, io, settings, MovementCommand::Open).await?;
    let close_time = traverse(door, io, settings, MovementCommand::Close).await?;

    Ok(TravelTimes {
        open_time: Some(open_time.as_secs_f64()),
        close_time: Some(close_time.as_secs_f64()),
        measured_at: Some(chrono::Utc::now().to_rfc3339()),
    })
}

async fn traverse(
    door: &DoorConfig,
    io: &dyn DigitalIo,
    settings: &MeasureSettings,
    direction: MovementCommand,
) -> Result<Duration, CalibrationError> {
    let start = Instant::now();
    pulse(io, door.pin_for(direction), settings.pulse).await?;
    wait_for(door, io, settings, direction).await?;
    let elapsed = start.elapsed();
    debug!(door = %door.id, %direction, secs = elapsed.as_secs_f64(), "Traversal timed");
    Ok(elapsed)
}

async fn wait_for(
    door: &DoorConfig,
    io: &dyn DigitalIo,
    settings: &MeasureSettings,
    direction: MovementCommand,
) -> Result<(), CalibrationError> {
    let target = if direction == MovementCommand::Open {
        "open"
    } else {
        "closed"
    };
    let start = Instant::now();
    loop {
        if reached(direction, &read_sample(io, door)?) {
            return Ok(());
        }
        if start.elapsed() > settings.timeout {
            return Err(CalibrationError::Timeout {
                door: door.id.clone(),
                target,
                waited: settings.timeout,
            });
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}

fn reached(direction: MovementCommand, sample: &SensorSample) -> bool {
    if direction == MovementCommand::Open {
        sample.is_open && !sample.is_closed
    } else {
        sample.is_closed && !sample.is_open
    }
}
