//! Control loop
//!
//! Owns the tick timer and the bus event stream. A tick reads every enabled
//! door's limit switches, runs the estimator under the door's lock, samples
//! the SoC temperature and publishes what changed. Bus commands are handed
//! to the intake on their own tasks so a pulse never delays the next tick.

use doco_core::gpio::read_sample;
use doco_core::{Command, DoorId, Estimate, EstimateBranch, IntakeOutcome, PositionEstimator};
use doco_mqtt::{BusEvent, MessageBus};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::publisher::Publisher;
use crate::state::AppState;
use crate::thermal::ThermalProbe;

pub struct Controller {
    state: Arc<AppState>,
    estimator: PositionEstimator,
    publisher: Publisher,
    thermal: ThermalProbe,
    bus: Option<Arc<dyn MessageBus>>,
}

impl Controller {
    pub fn new(
        state: Arc<AppState>,
        estimator: PositionEstimator,
        bus: Option<Arc<dyn MessageBus>>,
    ) -> Self {
        let publisher = Publisher::new(&state.config);
        let thermal = ThermalProbe::new(&state.config.daemon.thermal_path);
        Self {
            state,
            estimator,
            publisher,
            thermal,
            bus,
        }
    }

    /// Run until `shutdown` completes, then mark everything offline
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BusEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut ticker = tokio::time::interval(self.state.config.daemon.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            doors = self.state.config.doors.len(),
            interval_secs = self.state.config.daemon.tick_interval_secs,
            policy = self.estimator.policy_name(),
            "Control loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }

        if let Some(bus) = &self.bus {
            self.publisher.announce_offline(bus.as_ref());
        }
        info!("Control loop stopped");
    }

    /// One estimate and publish pass over every door
    pub async fn tick(&mut self) {
        for door in self.state.config.doors.iter().filter(|d| d.enabled) {
            // Sensors are read under the lock so a pulse cannot land between
            // the reading and the update
            let Some(mut record) = self.state.cache.lock(&door.id).await else {
                continue;
            };
            let sample = match read_sample(self.state.io.as_ref(), door) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(door = %door.id, error = %e, "Sensor read failed, door skipped");
                    continue;
                }
            };
            let travel = self.state.calibration.travel_times(&door.id);
            let estimate = self.estimator.update(sample, &mut record, &travel, Instant::now());
            drop(record);
            log_estimate(&door.id, &estimate);
        }

        if let Some(celsius) = self.thermal.read().await {
            self.state.cache.set_cpu_temperature(Some(celsius)).await;
        }

        if let Some(bus) = self.bus.clone() {
            bus.request_reconnect();
            let snapshot = self.state.cache.snapshot().await;
            let scalars = self.state.cache.scalars().await;
            self.publisher.publish_changes(bus.as_ref(), &snapshot, &scalars);
        }
    }

    pub async fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected => self.on_connected().await,
            BusEvent::Disconnected => info!("Bus offline, retrying on each tick"),
            BusEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    async fn on_connected(&mut self) {
        let Some(bus) = self.bus.clone() else {
            return;
        };
        for topic in self.publisher.command_topics() {
            match bus.subscribe(&topic) {
                Ok(()) => debug!(topic = %topic, "Subscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Subscribe failed"),
            }
        }
        let snapshot = self.state.cache.snapshot().await;
        let scalars = self.state.cache.scalars().await;
        let sent = self.publisher.republish_all(bus.as_ref(), &snapshot, &scalars);
        info!(messages = sent, "Published full state");
    }

    fn on_message(&self, topic: &str, payload: &str) {
        let Some(door) = self.publisher.door_for_command(topic) else {
            debug!(topic = %topic, "Message on unhandled topic");
            return;
        };
        let command: Command = match payload.parse() {
            Ok(command) => command,
            Err(e) => {
                warn!(door = %door, error = %e, "Ignoring bus command");
                return;
            }
        };

        let intake = self.state.intake.clone();
        let door = door.clone();
        tokio::spawn(async move {
            match intake.submit(door.as_str(), command).await {
                Ok(IntakeOutcome::Accepted) => {
                    info!(door = %door, %command, "Command accepted from bus")
                }
                Ok(IntakeOutcome::Ignored(reason)) => {
                    debug!(door = %door, %command, ?reason, "Command ignored")
                }
                Err(e) if e.is_fault() => error!(door = %door, error = %e, "Command failed"),
                Err(e) => warn!(door = %door, error = %e, "Command rejected"),
            }
        });
    }
}

fn log_estimate(door: &DoorId, estimate: &Estimate) {
    if estimate.sensor_fault {
        warn!(door = %door, "Both limit switches asserted, treating as in transit");
    }
    if let Some(command) = estimate.inferred {
        info!(door = %door, %command, "Movement without a command, inferred");
    }
    if estimate.calibration_missing() {
        warn!(door = %door, "No travel time calibrated, assuming stalled");
    } else if estimate.branch == EstimateBranch::Stalled {
        info!(door = %door, "Travel time elapsed without reaching a limit, assuming stalled");
    }
    if let Some(command) = estimate.cleared {
        debug!(door = %door, %command, "Command cleared");
    }
    debug!(
        door = %door,
        state = ?estimate.state,
        position = ?estimate.position,
        branch = ?estimate.branch,
        "Estimate"
    );
}
