//! Command intake
//!
//! Entry point for every command, whichever surface it arrived on. A command
//! is validated against the door's configuration and class, the mapped
//! actuator is pulsed, and the intent is recorded in the state cache for the
//! estimator to pick up on the next tick. Pulse and record update happen
//! under the door's lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::StateCache;
use crate::door::{Command, DoorConfig, DoorId, DoorState, MovementCommand};
use crate::gpio::{pulse, DigitalIo, GpioError, Level};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("Unknown door: {0}")]
    UnknownDoor(String),
    #[error("Door {0} is disabled")]
    Disabled(DoorId),
    #[error("{command} is not supported by {class} door {door}")]
    Unsupported {
        door: DoorId,
        class: &'static str,
        command: Command,
    },
    #[error("Door {0} has no light pin configured")]
    NoLightPin(DoorId),
    #[error("Actuator fault on door {door}: {source}")]
    Actuator {
        door: DoorId,
        #[source]
        source: GpioError,
    },
}

impl IntakeError {
    /// Hardware trouble, as opposed to a command that was simply invalid
    pub fn is_fault(&self) -> bool {
        matches!(self, IntakeError::Actuator { .. })
    }
}

/// Why a valid command was dropped without touching the door
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// STOP while the door is not moving under OPEN or CLOSE
    NothingToStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Accepted,
    Ignored(IgnoreReason),
}

/// Validates commands, pulses actuators and records intent
pub struct CommandIntake {
    doors: BTreeMap<DoorId, DoorConfig>,
    io: Arc<dyn DigitalIo>,
    cache: Arc<StateCache>,
    pulse: Duration,
}

impl CommandIntake {
    pub fn new(
        doors: &[DoorConfig],
        io: Arc<dyn DigitalIo>,
        cache: Arc<StateCache>,
        pulse: Duration,
    ) -> Self {
        Self {
            doors: doors.iter().map(|d| (d.id.clone(), d.clone())).collect(),
            io,
            cache,
            pulse,
        }
    }

    pub fn door(&self, id: &str) -> Option<&DoorConfig> {
        self.doors.get(&DoorId::new(id))
    }

    fn enabled_door(&self, door: &str) -> Result<&DoorConfig, IntakeError> {
        let config = self
            .door(door)
            .ok_or_else(|| IntakeError::UnknownDoor(door.to_string()))?;
        if !config.enabled {
            return Err(IntakeError::Disabled(config.id.clone()));
        }
        Ok(config)
    }

    /// Carry out a command for a door
    pub async fn submit(
        &self,
        door: &str,
        command: Command,
    ) -> Result<IntakeOutcome, IntakeError> {
        let config = self.enabled_door(door)?;
        if !config.class.supports(command) {
            return Err(IntakeError::Unsupported {
                door: config.id.clone(),
                class: config.class.as_str(),
                command,
            });
        }

        match command.movement() {
            Some(movement) => self.move_door(config, movement).await,
            None => self.switch_light(config, command == Command::LightOn).await,
        }
    }

    /// Pulse the impulse contact regardless of the door's state.
    ///
    /// The drive treats the contact as a toggle, so on an idle door this
    /// starts a movement that the estimator later infers. A running OPEN or
    /// CLOSE is recorded as stopped.
    pub async fn impulse(&self, door: &str) -> Result<IntakeOutcome, IntakeError> {
        let config = self.enabled_door(door)?;
        let mut record = self
            .cache
            .lock(&config.id)
            .await
            .ok_or_else(|| IntakeError::UnknownDoor(config.id.to_string()))?;

        let pin = config.pins.impulse;
        self.pulse_pin(config, pin).await?;

        if matches!(
            record.active_command(),
            Some(MovementCommand::Open | MovementCommand::Close)
        ) {
            record.clear_command();
            record.state = Some(DoorState::Stopped);
        }

        info!(door = %config.id, pin, "Impulse issued");
        Ok(IntakeOutcome::Accepted)
    }

    async fn pulse_pin(&self, config: &DoorConfig, pin: u8) -> Result<(), IntakeError> {
        pulse(self.io.as_ref(), pin, self.pulse)
            .await
            .map_err(|source| IntakeError::Actuator {
                door: config.id.clone(),
                source,
            })
    }

    async fn move_door(
        &self,
        config: &DoorConfig,
        command: MovementCommand,
    ) -> Result<IntakeOutcome, IntakeError> {
        let mut record = self
            .cache
            .lock(&config.id)
            .await
            .ok_or_else(|| IntakeError::UnknownDoor(config.id.to_string()))?;

        if command == MovementCommand::Stop
            && !matches!(
                record.active_command(),
                Some(MovementCommand::Open | MovementCommand::Close)
            )
        {
            debug!(door = %config.id, "STOP ignored, door is not moving");
            return Ok(IntakeOutcome::Ignored(IgnoreReason::NothingToStop));
        }

        let pin = config.pin_for(command);
        self.pulse_pin(config, pin).await?;

        if command == MovementCommand::Stop {
            record.clear_command();
            record.state = Some(DoorState::Stopped);
        } else {
            record.issue(command, Instant::now());
        }

        info!(door = %config.id, %command, pin, "Command issued");
        Ok(IntakeOutcome::Accepted)
    }

    async fn switch_light(
        &self,
        config: &DoorConfig,
        on: bool,
    ) -> Result<IntakeOutcome, IntakeError> {
        let pin = config
            .pins
            .light
            .ok_or_else(|| IntakeError::NoLightPin(config.id.clone()))?;
        let level = if on { Level::Low } else { Level::High };
        self.io
            .write(pin, level)
            .map_err(|source| IntakeError::Actuator {
                door: config.id.clone(),
                source,
            })?;
        self.cache.set_light(&config.id, on).await;
        info!(door = %config.id, on, "Light switched");
        Ok(IntakeOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::tests::{fence, garage};
    use crate::gpio::SimulatedIo;

    struct Rig {
        io: Arc<SimulatedIo>,
        cache: Arc<StateCache>,
        intake: CommandIntake,
    }

    fn rig(doors: Vec<DoorConfig>) -> Rig {
        let io = Arc::new(SimulatedIo::new());
        let cache = Arc::new(StateCache::new(doors.iter().map(|d| d.id.clone())));
        let intake =
            CommandIntake::new(&doors, io.clone(), cache.clone(), Duration::from_millis(100));
        Rig { io, cache, intake }
    }

    struct BrokenIo;

    impl DigitalIo for BrokenIo {
        fn read(&self, pin: u8) -> Result<bool, GpioError> {
            Err(GpioError::UnknownPin(pin))
        }

        fn write(&self, pin: u8, _level: Level) -> Result<(), GpioError> {
            Err(GpioError::Access {
                pin,
                reason: "bus error".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_pulses_and_records() {
        let rig = rig(vec![garage()]);
        let outcome = rig.intake.submit("garage", Command::Open).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Accepted);
        assert_eq!(rig.io.writes(), vec![(23, Level::Low), (23, Level::High)]);

        let record = rig.cache.get(&DoorId::new("garage")).await.unwrap();
        assert_eq!(record.active_command(), Some(MovementCommand::Open));
        assert!(record.command_issued_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_requires_movement() {
        let rig = rig(vec![garage()]);
        let outcome = rig.intake.submit("garage", Command::Stop).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Ignored(IgnoreReason::NothingToStop));
        assert!(rig.io.writes().is_empty());

        rig.intake.submit("garage", Command::Venting).await.unwrap();
        let outcome = rig.intake.submit("garage", Command::Stop).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Ignored(IgnoreReason::NothingToStop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_active_command() {
        let rig = rig(vec![garage()]);
        rig.intake.submit("garage", Command::Close).await.unwrap();
        let outcome = rig.intake.submit("garage", Command::Stop).await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Accepted);
        assert_eq!(rig.io.writes().last(), Some(&(25, Level::High)));

        let record = rig.cache.get(&DoorId::new("garage")).await.unwrap();
        assert_eq!(record.active, None);
        assert_eq!(record.state, Some(DoorState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_impulse_pulses_idle_door() {
        let rig = rig(vec![garage()]);
        let outcome = rig.intake.impulse("garage").await.unwrap();
        assert_eq!(outcome, IntakeOutcome::Accepted);
        assert_eq!(rig.io.writes(), vec![(25, Level::Low), (25, Level::High)]);

        // Left for the estimator to infer
        let record = rig.cache.get(&DoorId::new("garage")).await.unwrap();
        assert_eq!(record, Default::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_impulse_stops_running_command() {
        let rig = rig(vec![garage(), fence()]);
        rig.intake.submit("fence", Command::Open).await.unwrap();
        rig.intake.impulse("fence").await.unwrap();
        assert_eq!(rig.io.writes().last(), Some(&(12, Level::High)));

        let record = rig.cache.get(&DoorId::new("fence")).await.unwrap();
        assert_eq!(record.active, None);
        assert_eq!(record.state, Some(DoorState::Stopped));

        let err = rig.intake.impulse("shed").await.unwrap_err();
        assert_eq!(err, IntakeError::UnknownDoor("shed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_class_restrictions() {
        let rig = rig(vec![garage(), fence()]);

        let err = rig.intake.submit("fence", Command::Venting).await.unwrap_err();
        assert!(matches!(err, IntakeError::Unsupported { .. }));
        assert!(!err.is_fault());

        let err = rig.intake.submit("garage", Command::Half).await.unwrap_err();
        assert!(matches!(err, IntakeError::Unsupported { .. }));
        assert!(rig.io.writes().is_empty());

        rig.intake.submit("fence", Command::Half).await.unwrap();
        assert_eq!(rig.io.writes()[0], (16, Level::Low));
        let record = rig.cache.get(&DoorId::new("fence")).await.unwrap();
        assert_eq!(record.active_command(), Some(MovementCommand::Half));
        let garage = rig.cache.get(&DoorId::new("garage")).await.unwrap();
        assert_eq!(garage.active, None);
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_doors() {
        let mut disabled = fence();
        disabled.enabled = false;
        let rig = rig(vec![garage(), disabled]);

        let err = rig.intake.submit("shed", Command::Open).await.unwrap_err();
        assert_eq!(err, IntakeError::UnknownDoor("shed".to_string()));

        let err = rig.intake.submit("fence", Command::Open).await.unwrap_err();
        assert_eq!(err, IntakeError::Disabled(DoorId::new("fence")));
        assert!(rig.io.writes().is_empty());
    }

    #[tokio::test]
    async fn test_light_commands() {
        let rig = rig(vec![garage()]);
        let err = rig.intake.submit("garage", Command::LightOn).await.unwrap_err();
        assert_eq!(err, IntakeError::NoLightPin(DoorId::new("garage")));

        let mut lit = garage();
        lit.pins.light = Some(5);
        let rig = super::tests::rig(vec![lit]);
        rig.intake.submit("garage", Command::LightOn).await.unwrap();
        assert_eq!(rig.io.output(5), Some(Level::Low));
        assert_eq!(rig.cache.light(&DoorId::new("garage")).await, Some(true));

        rig.intake.submit("garage", Command::LightOff).await.unwrap();
        assert_eq!(rig.io.output(5), Some(Level::High));
        assert_eq!(rig.cache.light(&DoorId::new("garage")).await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actuator_fault_leaves_record_untouched() {
        let doors = vec![garage()];
        let cache = Arc::new(StateCache::new(doors.iter().map(|d| d.id.clone())));
        let io = Arc::new(BrokenIo);
        let intake = CommandIntake::new(&doors, io, cache.clone(), Duration::from_millis(100));

        let err = intake.submit("garage", Command::Open).await.unwrap_err();
        assert!(err.is_fault());
        let record = cache.get(&DoorId::new("garage")).await.unwrap();
        assert_eq!(record, Default::default());
    }
}
