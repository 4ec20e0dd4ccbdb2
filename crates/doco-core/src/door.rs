//! Door types shared by the estimator, the intake and the daemon

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// Unique identifier for a door, taken from configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoorId(pub String);

impl DoorId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DoorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of drive behind a door, which decides the commands it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorClass {
    /// Sectional garage door with a climate (venting) position and a light
    Garage,
    /// Sliding fence gate with a half-open pedestrian position
    Fence,
}

impl DoorClass {
    /// Whether a command is meaningful for this class of door
    pub fn supports(&self, command: Command) -> bool {
        match command {
            Command::Open | Command::Close | Command::Stop => true,
            Command::Venting | Command::LightOn | Command::LightOff => *self == DoorClass::Garage,
            Command::Half => *self == DoorClass::Fence,
        }
    }

    /// The stable partial-open state reached through the auxiliary pin
    pub fn held_state(&self) -> DoorState {
        match self {
            DoorClass::Garage => DoorState::Venting,
            DoorClass::Fence => DoorState::Half,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DoorClass::Garage => "garage",
            DoorClass::Fence => "fence",
        }
    }
}

/// Discrete door state as reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DoorState {
    Closed,
    Open,
    Opening,
    Closing,
    Stopped,
    Venting,
    Half,
}

impl DoorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Closed => "CLOSED",
            DoorState::Open => "OPEN",
            DoorState::Opening => "OPENING",
            DoorState::Closing => "CLOSING",
            DoorState::Stopped => "STOPPED",
            DoorState::Venting => "VENTING",
            DoorState::Half => "HALF",
        }
    }

    /// State name on the bus. Partial-open positions are reported as open.
    pub fn published(&self) -> &'static str {
        match self {
            DoorState::Venting | DoorState::Half => "OPEN",
            other => other.as_str(),
        }
    }

    /// Stable partial-open states kept while the sensors are ambiguous
    pub fn is_held(&self) -> bool {
        matches!(self, DoorState::Venting | DoorState::Half)
    }
}

impl std::fmt::Display for DoorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

/// Canonical inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Open,
    Close,
    Stop,
    Venting,
    Half,
    LightOn,
    LightOff,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Open => "OPEN",
            Command::Close => "CLOSE",
            Command::Stop => "STOP",
            Command::Venting => "VENTING",
            Command::Half => "HALF",
            Command::LightOn => "LIGHT_ON",
            Command::LightOff => "LIGHT_OFF",
        }
    }

    /// Commands that pulse an actuator and become the door's active command
    pub fn movement(&self) -> Option<MovementCommand> {
        match self {
            Command::Open => Some(MovementCommand::Open),
            Command::Close => Some(MovementCommand::Close),
            Command::Stop => Some(MovementCommand::Stop),
            Command::Venting => Some(MovementCommand::Venting),
            Command::Half => Some(MovementCommand::Half),
            Command::LightOn | Command::LightOff => None,
        }
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Command::Open),
            "CLOSE" => Ok(Command::Close),
            "STOP" => Ok(Command::Stop),
            "VENTING" => Ok(Command::Venting),
            "HALF" => Ok(Command::Half),
            "LIGHT_ON" => Ok(Command::LightOn),
            "LIGHT_OFF" => Ok(Command::LightOff),
            _ => Err(UnknownCommand(s.trim().to_string())),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command kinds that can be recorded as a door's active command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementCommand {
    Open,
    Close,
    Stop,
    Venting,
    Half,
}

impl MovementCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementCommand::Open => "OPEN",
            MovementCommand::Close => "CLOSE",
            MovementCommand::Stop => "STOP",
            MovementCommand::Venting => "VENTING",
            MovementCommand::Half => "HALF",
        }
    }
}

impl std::fmt::Display for MovementCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command together with the monotonic instant it was issued.
///
/// Keeping both in one value means a door can never carry a timestamp
/// without a command or the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCommand {
    pub command: MovementCommand,
    pub issued_at: Instant,
}

/// In-memory record of one door, owned by the state cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoorRuntimeState {
    /// Discrete state, unknown until the first estimate
    pub state: Option<DoorState>,
    /// Estimated opening in percent (0 = closed, 100 = open)
    pub position: Option<u8>,
    /// Command currently being carried out, if any
    pub active: Option<ActiveCommand>,
    /// Last OPEN/CLOSED reading not yet consumed by the inference policy
    pub last_settled: Option<DoorState>,
}

impl DoorRuntimeState {
    pub fn active_command(&self) -> Option<MovementCommand> {
        self.active.map(|a| a.command)
    }

    pub fn command_issued_at(&self) -> Option<Instant> {
        self.active.map(|a| a.issued_at)
    }

    /// Record a command as the door's single active command
    pub fn issue(&mut self, command: MovementCommand, now: Instant) {
        self.active = Some(ActiveCommand {
            command,
            issued_at: now,
        });
    }

    /// Drop the active command, returning what was cleared
    pub fn clear_command(&mut self) -> Option<MovementCommand> {
        self.active.take().map(|a| a.command)
    }
}

/// Raw reading of the two limit switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    pub is_open: bool,
    pub is_closed: bool,
}

impl SensorSample {
    pub fn new(is_open: bool, is_closed: bool) -> Self {
        Self { is_open, is_closed }
    }

    /// Neither or both switches asserted
    pub fn is_ambiguous(&self) -> bool {
        self.is_open == self.is_closed
    }

    /// Both switches asserted at once, which no real door position produces
    pub fn is_fault(&self) -> bool {
        self.is_open && self.is_closed
    }

    /// Legacy position word: up, down or somewhere in between
    pub fn legacy_position(&self) -> &'static str {
        match (self.is_open, self.is_closed) {
            (true, false) => "up",
            (false, true) => "down",
            _ => "somewhere",
        }
    }
}

/// Actuator outputs of a door (BCM numbering)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorPins {
    pub open: u8,
    pub close: u8,
    /// Impulse contact, used to stop a running drive
    pub impulse: u8,
    /// Climate contact on a garage, half-open contact on a fence
    pub auxiliary: u8,
    /// Optional light relay (garage only)
    #[serde(default)]
    pub light: Option<u8>,
}

/// Limit switch inputs of a door (BCM numbering)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorPins {
    pub is_open: u8,
    pub is_closed: u8,
}

/// Static description of one door
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorConfig {
    pub id: DoorId,
    pub class: DoorClass,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bus topic prefix; `<base_topic>/<id>` when unset
    #[serde(default)]
    pub topic: Option<String>,
    pub pins: DoorPins,
    pub sensors: SensorPins,
    /// Limit switches pull their input low when asserted
    #[serde(default)]
    pub sensor_active_low: bool,
}

fn default_true() -> bool {
    true
}

impl DoorConfig {
    /// Output pin pulsed for a movement command
    pub fn pin_for(&self, command: MovementCommand) -> u8 {
        match command {
            MovementCommand::Open => self.pins.open,
            MovementCommand::Close => self.pins.close,
            MovementCommand::Stop => self.pins.impulse,
            MovementCommand::Venting | MovementCommand::Half => self.pins.auxiliary,
        }
    }

    pub fn output_pins(&self) -> Vec<u8> {
        let mut pins = vec![
            self.pins.open,
            self.pins.close,
            self.pins.impulse,
            self.pins.auxiliary,
        ];
        pins.extend(self.pins.light);
        pins
    }

    pub fn input_pins(&self) -> Vec<u8> {
        vec![self.sensors.is_open, self.sensors.is_closed]
    }

    /// Turn raw input levels into switch states, honoring polarity
    pub fn sample_from_levels(&self, open_high: bool, closed_high: bool) -> SensorSample {
        if self.sensor_active_low {
            SensorSample::new(!open_high, !closed_high)
        } else {
            SensorSample::new(open_high, closed_high)
        }
    }

    /// Resolve the bus topic prefix for this door
    pub fn topic(&self, base_topic: &str) -> String {
        match &self.topic {
            Some(topic) => topic.trim_end_matches('/').to_string(),
            None => format!("{}/{}", base_topic.trim_end_matches('/'), self.id),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn garage() -> DoorConfig {
        DoorConfig {
            id: DoorId::new("garage"),
            class: DoorClass::Garage,
            enabled: true,
            topic: None,
            pins: DoorPins {
                open: 23,
                close: 24,
                impulse: 25,
                auxiliary: 8,
                light: None,
            },
            sensors: SensorPins {
                is_open: 17,
                is_closed: 27,
            },
            sensor_active_low: false,
        }
    }

    pub(crate) fn fence() -> DoorConfig {
        DoorConfig {
            id: DoorId::new("fence"),
            class: DoorClass::Fence,
            enabled: true,
            topic: Some("home/fence/".to_string()),
            pins: DoorPins {
                open: 7,
                close: 1,
                impulse: 12,
                auxiliary: 16,
                light: None,
            },
            sensors: SensorPins {
                is_open: 10,
                is_closed: 9,
            },
            sensor_active_low: false,
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(" open ".parse::<Command>(), Ok(Command::Open));
        assert_eq!("light_on".parse::<Command>(), Ok(Command::LightOn));
        assert_eq!("VENTING".parse::<Command>(), Ok(Command::Venting));
        assert_eq!(
            "toggle".parse::<Command>(),
            Err(UnknownCommand("toggle".to_string()))
        );
    }

    #[test]
    fn test_class_support() {
        assert!(DoorClass::Garage.supports(Command::Venting));
        assert!(DoorClass::Garage.supports(Command::LightOff));
        assert!(!DoorClass::Garage.supports(Command::Half));
        assert!(DoorClass::Fence.supports(Command::Half));
        assert!(!DoorClass::Fence.supports(Command::Venting));
        assert!(!DoorClass::Fence.supports(Command::LightOn));
    }

    #[test]
    fn test_pin_mapping_is_distinct() {
        let door = garage();
        assert_eq!(door.pin_for(MovementCommand::Open), 23);
        assert_eq!(door.pin_for(MovementCommand::Close), 24);
        assert_eq!(door.pin_for(MovementCommand::Stop), 25);
        assert_eq!(door.pin_for(MovementCommand::Venting), 8);
        assert_eq!(fence().pin_for(MovementCommand::Half), 16);
    }

    #[test]
    fn test_topic_resolution() {
        assert_eq!(garage().topic("doco/"), "doco/garage");
        assert_eq!(fence().topic("doco"), "home/fence");
    }

    #[test]
    fn test_sensor_polarity() {
        let mut door = garage();
        assert_eq!(door.sample_from_levels(true, false), SensorSample::new(true, false));
        door.sensor_active_low = true;
        assert_eq!(door.sample_from_levels(true, false), SensorSample::new(false, true));
    }

    #[test]
    fn test_published_state_names() {
        assert_eq!(DoorState::Venting.published(), "OPEN");
        assert_eq!(DoorState::Half.published(), "OPEN");
        assert_eq!(DoorState::Stopped.published(), "STOPPED");
        assert_eq!(SensorSample::new(true, true).legacy_position(), "somewhere");
    }
}
