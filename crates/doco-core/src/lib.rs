//! doco Core - Door state estimation and command reconciliation
//!
//! This crate provides the domain logic of the doco controller:
//! - Door, command and sensor types shared by every component
//! - The position estimator that fuses limit sensors, commands and time
//! - Travel-time calibration (measurement and persistence)
//! - The per-door state cache and the command intake that pulses actuators
//! - The digital I/O gateway abstraction

pub mod cache;
pub mod calibration;
pub mod door;
pub mod estimator;
pub mod gpio;
pub mod inference;
pub mod intake;

pub use cache::{DoorSnapshot, Scalars, StateCache};
pub use calibration::{CalibrationData, CalibrationError, CalibrationStore, TravelTimes};
pub use door::{
    ActiveCommand, Command, DoorClass, DoorConfig, DoorId, DoorPins, DoorRuntimeState, DoorState,
    MovementCommand, SensorPins, SensorSample,
};
pub use estimator::{Estimate, EstimateBranch, PositionEstimator};
pub use gpio::{DigitalIo, GpioError, Level, SimulatedIo};
pub use inference::{InferencePolicy, LastSettledPolicy, NoInference};
pub use intake::{CommandIntake, IgnoreReason, IntakeError, IntakeOutcome};
