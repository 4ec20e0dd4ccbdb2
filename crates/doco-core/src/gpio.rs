//! Digital I/O gateway
//!
//! The controller only needs three primitives from the hardware: read an
//! input, drive an output and pulse an output. Actuator relays are active
//! low, so a pulse holds the pin low and then releases it high.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};

use crate::door::{DoorConfig, SensorSample};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpioError {
    #[error("Pin {0} is not configured")]
    UnknownPin(u8),
    #[error("GPIO access failed on pin {pin}: {reason}")]
    Access { pin: u8, reason: String },
}

/// Output level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Read/write access to configured pins
pub trait DigitalIo: Send + Sync {
    /// Current input level, `true` for high
    fn read(&self, pin: u8) -> Result<bool, GpioError>;

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError>;
}

/// Releases the pin when dropped, so a cancelled pulse never leaves a
/// relay energized
struct PulseGuard<'a> {
    io: &'a dyn DigitalIo,
    pin: u8,
}

impl Drop for PulseGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.io.write(self.pin, Level::High) {
            warn!(pin = self.pin, error = %e, "Failed to release pulsed pin");
        }
    }
}

/// Hold `pin` low for `duration`, then release it high
pub async fn pulse(io: &dyn DigitalIo, pin: u8, duration: Duration) -> Result<(), GpioError> {
    io.write(pin, Level::Low)?;
    let guard = PulseGuard { io, pin };
    trace!(pin, ms = duration.as_millis() as u64, "Pulse");
    tokio::time::sleep(duration).await;
    std::mem::forget(guard);
    io.write(pin, Level::High)
}

/// Read both limit switches of a door
pub fn read_sample(io: &dyn DigitalIo, door: &DoorConfig) -> Result<SensorSample, GpioError> {
    let open = io.read(door.sensors.is_open)?;
    let closed = io.read(door.sensors.is_closed)?;
    Ok(door.sample_from_levels(open, closed))
}

/// In-memory gateway used by `--simulate` and by tests.
///
/// Inputs are set by the caller; every write is recorded in order.
#[derive(Debug, Default)]
pub struct SimulatedIo {
    inputs: Mutex<HashMap<u8, bool>>,
    outputs: Mutex<HashMap<u8, Level>>,
    writes: Mutex<Vec<(u8, Level)>>,
}

impl SimulatedIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level an input pin will read
    pub fn set_input(&self, pin: u8, high: bool) {
        lock(&self.inputs).insert(pin, high);
    }

    /// Present a limit switch reading for a door
    pub fn set_sample(&self, door: &DoorConfig, sample: SensorSample) {
        let (open, closed) = if door.sensor_active_low {
            (!sample.is_open, !sample.is_closed)
        } else {
            (sample.is_open, sample.is_closed)
        };
        self.set_input(door.sensors.is_open, open);
        self.set_input(door.sensors.is_closed, closed);
    }

    /// Last level written to an output pin
    pub fn output(&self, pin: u8) -> Option<Level> {
        lock(&self.outputs).get(&pin).copied()
    }

    /// Every write so far, oldest first
    pub fn writes(&self) -> Vec<(u8, Level)> {
        lock(&self.writes).clone()
    }
}

impl DigitalIo for SimulatedIo {
    fn read(&self, pin: u8) -> Result<bool, GpioError> {
        Ok(lock(&self.inputs).get(&pin).copied().unwrap_or(false))
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        lock(&self.outputs).insert(pin, level);
        lock(&self.writes).push((pin, level));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
