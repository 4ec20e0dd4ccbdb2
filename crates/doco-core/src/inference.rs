//! Inference of movements started outside of doco
//!
//! A physical remote moves the door without any command passing through the
//! intake. The only evidence is a limit switch releasing. A policy decides
//! which movement that evidence implies; the estimator then tracks it like a
//! command of its own.
//!
//! The default policy only knows the last settled position, so it misreads a
//! reversal mid-travel or a second remote. It is kept behind a trait so a
//! better source (real position feedback, drive bus) can replace it.

use crate::door::{DoorRuntimeState, DoorState, MovementCommand};

/// Decides which command explains an unexplained movement
pub trait InferencePolicy: Send + Sync {
    /// Called when the sensors are ambiguous and no command is active.
    ///
    /// May consume evidence from the record so the same departure is not
    /// inferred twice.
    fn infer(&self, state: &mut DoorRuntimeState) -> Option<MovementCommand>;

    fn name(&self) -> &'static str;
}

/// Infer the opposite of the last settled position
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSettledPolicy;

impl InferencePolicy for LastSettledPolicy {
    fn infer(&self, state: &mut DoorRuntimeState) -> Option<MovementCommand> {
        match state.last_settled.take() {
            Some(DoorState::Open) => Some(MovementCommand::Close),
            Some(DoorState::Closed) => Some(MovementCommand::Open),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        "last-settled"
    }
}

/// Never infer anything; unexplained movement holds the last estimate
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInference;

impl InferencePolicy for NoInference {
    fn infer(&self, _state: &mut DoorRuntimeState) -> Option<MovementCommand> {
        None
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
