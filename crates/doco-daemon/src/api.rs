//! Legacy HTTP handlers
//!
//! `POST /move` and `POST /get` keep the request shape and status codes of
//! the original door web service. Bodies are parsed by hand so that any
//! malformed request maps to 400 before the token is looked at.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use doco_core::gpio::read_sample;
use doco_core::{Command, DoorClass, IntakeOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

#[derive(Deserialize)]
struct MoveRequest {
    token: String,
    gate: String,
    direction: String,
}

#[derive(Deserialize)]
struct GetRequest {
    token: String,
    gate: String,
}

/// `/get` response
#[derive(Serialize)]
pub struct PositionResponse {
    /// `up`, `down` or `somewhere`, from a live sensor read
    pub position: &'static str,
    /// Last estimated state as published on the bus
    pub state: Option<&'static str>,
    /// Last estimated opening in percent
    pub percent: Option<u8>,
}

/// What a `/move` direction asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveAction {
    Command(Command),
    /// Unconditional pulse of the impulse contact
    Impulse,
}

impl std::fmt::Display for MoveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoveAction::Command(command) => write!(f, "{command}"),
            MoveAction::Impulse => f.write_str("IMPULSE"),
        }
    }
}

/// Map a legacy direction word to an action. Canonical command names are
/// accepted as well.
pub fn direction_action(class: DoorClass, direction: &str) -> Option<MoveAction> {
    let command = match (class, direction) {
        (_, "impulse") => return Some(MoveAction::Impulse),
        (DoorClass::Garage, "up") => Command::Open,
        (DoorClass::Garage, "down") => Command::Close,
        (DoorClass::Garage, "climate") => Command::Venting,
        _ => direction.parse().ok()?,
    };
    Some(MoveAction::Command(command))
}

/// Move a door
pub async fn move_door(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<MoveRequest>(&body) else {
        debug!("Malformed /move request");
        return StatusCode::BAD_REQUEST.into_response();
    };
    if let Err(e) = state.token.check(&req.token) {
        warn!(error = %e, "Rejected /move request");
        return e.status().into_response();
    }

    let Some(door) = state.intake.door(&req.gate) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(action) = direction_action(door.class, &req.direction) else {
        debug!(gate = %req.gate, direction = %req.direction, "Unknown direction");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let result = match action {
        MoveAction::Command(command) => state.intake.submit(&req.gate, command).await,
        MoveAction::Impulse => state.intake.impulse(&req.gate).await,
    };
    match result {
        Ok(IntakeOutcome::Accepted) => {
            info!(door = %req.gate, %action, "Command accepted over HTTP");
            StatusCode::OK.into_response()
        }
        Ok(IntakeOutcome::Ignored(reason)) => {
            debug!(door = %req.gate, %action, ?reason, "Command ignored");
            StatusCode::OK.into_response()
        }
        Err(e) if e.is_fault() => {
            error!(door = %req.gate, error = %e, "Command failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            warn!(door = %req.gate, error = %e, "Command rejected");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// Report a door's position
pub async fn get_position(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<GetRequest>(&body) else {
        debug!("Malformed /get request");
        return StatusCode::BAD_REQUEST.into_response();
    };
    if let Err(e) = state.token.check(&req.token) {
        warn!(error = %e, "Rejected /get request");
        return e.status().into_response();
    }

    let Some(door) = state.intake.door(&req.gate).filter(|d| d.enabled) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let sample = match read_sample(state.io.as_ref(), door) {
        Ok(sample) => sample,
        Err(e) => {
            error!(door = %door.id, error = %e, "Sensor read failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let record = state.cache.get(&door.id).await.unwrap_or_default();

    Json(PositionResponse {
        position: sample.legacy_position(),
        state: record.state.map(|s| s.published()),
        percent: record.position,
    })
    .into_response()
}
