//! Position estimator
//!
//! Infers a discrete state and a 0-100 position for a door that only has two
//! limit switches. A definitive switch reading always wins. Between the
//! switches the estimate comes from the active command, the calibrated
//! travel time and the time elapsed since the command was issued. When the
//! door should have arrived but no switch confirms it, the estimator gives up
//! on precision and reports the door as half open.
//!
//! The estimator never fails: every combination of inputs yields an
//! [`Estimate`]. Conditions worth reporting (sensor fault, missing
//! calibration, a cleared or inferred command) are carried in the result.

use std::time::{Duration, Instant};

use crate::calibration::TravelTimes;
use crate::door::{DoorRuntimeState, DoorState, MovementCommand, SensorSample};
use crate::inference::{InferencePolicy, LastSettledPolicy};

/// A command older than this is stale once a limit switch confirms a position
pub const STALE_COMMAND_AFTER: Duration = Duration::from_secs(2);

/// Extra time granted on top of the calibrated travel time
pub const STALL_GRACE: Duration = Duration::from_secs(1);

/// Position reported for the venting and half-open states
pub const HELD_POSITION: u8 = 10;

/// Position reported when a movement outlived its travel window
pub const STALL_POSITION: u8 = 50;

/// Which rule produced an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateBranch {
    /// Open switch only
    Opened,
    /// Closed switch only
    Closed,
    /// Ambiguous reading, previous estimate kept
    Held,
    /// A venting or half command settled into its partial-open state
    EnteredHeld,
    /// Door moving under an explicit or inferred command
    Travelling,
    /// Travel window elapsed without a confirming switch
    Stalled,
    /// No travel time known for the direction; stall policy applied
    CalibrationMissing,
}

/// Result of one estimator step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimate {
    pub state: Option<DoorState>,
    pub position: Option<u8>,
    pub branch: EstimateBranch,
    /// Command removed from the record during this step
    pub cleared: Option<MovementCommand>,
    /// Command inferred from an unexplained movement during this step
    pub inferred: Option<MovementCommand>,
    /// Both limit switches were asserted
    pub sensor_fault: bool,
}

impl Estimate {
    pub fn calibration_missing(&self) -> bool {
        self.branch == EstimateBranch::CalibrationMissing
    }
}

/// The door state machine
pub struct PositionEstimator {
    policy: Box<dyn InferencePolicy>,
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::new(LastSettledPolicy)
    }
}

impl PositionEstimator {
    pub fn new(policy: impl InferencePolicy + 'static) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Advance one door's record from a fresh sensor sample.
    ///
    /// Rules, first match wins:
    /// 1. open only: OPEN at 100
    /// 2. closed only: CLOSED at 0
    /// 3. ambiguous (neither, or both which is never trusted):
    ///    a. VENTING/HALF are held
    ///    b. an active VENTING/HALF command enters its held state at 10
    ///    c. without a command, a STOPPED door is held and otherwise the
    ///       inference policy may supply one
    ///    d. an OPEN/CLOSE command is tracked against its travel time
    pub fn update(
        &self,
        sample: SensorSample,
        record: &mut DoorRuntimeState,
        travel: &TravelTimes,
        now: Instant,
    ) -> Estimate {
        let sensor_fault = sample.is_fault();

        if !sample.is_ambiguous() {
            let (state, position, branch) = if sample.is_open {
                (DoorState::Open, 100, EstimateBranch::Opened)
            } else {
                (DoorState::Closed, 0, EstimateBranch::Closed)
            };
            let cleared = match record.command_issued_at() {
                Some(issued_at)
                    if now.saturating_duration_since(issued_at) > STALE_COMMAND_AFTER =>
                {
                    record.clear_command()
                }
                _ => None,
            };
            record.state = Some(state);
            record.position = Some(position);
            record.last_settled = Some(state);
            return finish(record, branch, cleared, None, sensor_fault);
        }

        if record.state.is_some_and(|s| s.is_held()) {
            return finish(record, EstimateBranch::Held, None, None, sensor_fault);
        }

        let mut inferred = None;
        let command = match record.active_command() {
            Some(command) => command,
            None if record.state == Some(DoorState::Stopped) => {
                return finish(record, EstimateBranch::Held, None, None, sensor_fault);
            }
            None => match self.policy.infer(record) {
                Some(command) => {
                    record.issue(command, now);
                    inferred = Some(command);
                    command
                }
                None => return finish(record, EstimateBranch::Held, None, None, sensor_fault),
            },
        };

        // The door has left its last settled position under a known command,
        // so that departure is explained and must not be inferred again.
        record.last_settled = None;

        match command {
            MovementCommand::Venting | MovementCommand::Half => {
                let held = if command == MovementCommand::Venting {
                    DoorState::Venting
                } else {
                    DoorState::Half
                };
                let cleared = record.clear_command();
                record.state = Some(held);
                record.position = Some(HELD_POSITION);
                finish(record, EstimateBranch::EnteredHeld, cleared, inferred, sensor_fault)
            }
            MovementCommand::Stop => {
                let cleared = record.clear_command();
                finish(record, EstimateBranch::Held, cleared, inferred, sensor_fault)
            }
            MovementCommand::Open | MovementCommand::Close => {
                let travel_time = travel.for_direction(command);
                let issued_at = record.command_issued_at().unwrap_or(now);
                let elapsed = now.saturating_duration_since(issued_at).as_secs_f64();

                let Some(travel_time) = travel_time else {
                    let cleared = stall(record);
                    return finish(
                        record,
                        EstimateBranch::CalibrationMissing,
                        cleared,
                        inferred,
                        sensor_fault,
                    );
                };

                if elapsed > travel_time + STALL_GRACE.as_secs_f64() {
                    let cleared = stall(record);
                    return finish(record, EstimateBranch::Stalled, cleared, inferred, sensor_fault);
                }

                let progress = elapsed / travel_time * 100.0;
                let (state, raw) = if command == MovementCommand::Open {
                    (DoorState::Opening, progress)
                } else {
                    (DoorState::Closing, 100.0 - progress)
                };
                record.state = Some(state);
                record.position = Some(clamp_position(raw));
                finish(record, EstimateBranch::Travelling, None, inferred, sensor_fault)
            }
        }
    }
}

/// Round to the nearest percent and clamp into 0..=100
pub fn clamp_position(value: f64) -> u8 {
    if value.is_nan() {
        return STALL_POSITION;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn stall(record: &mut DoorRuntimeState) -> Option<MovementCommand> {
    record.state = Some(DoorState::Open);
    record.position = Some(STALL_POSITION);
    record.clear_command()
}

fn finish(
    record: &DoorRuntimeState,
    branch: EstimateBranch,
    cleared: Option<MovementCommand>,
    inferred: Option<MovementCommand>,
    sensor_fault: bool,
) -> Estimate {
    Estimate {
        state: record.state,
        position: record.position,
        branch,
        cleared,
        inferred,
        sensor_fault,
    }
}
