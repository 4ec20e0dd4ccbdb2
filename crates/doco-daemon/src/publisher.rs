//! State publishing
//!
//! Each tick the publisher renders the full set of topic payloads from a
//! cache snapshot and sends only the ones that differ from what was last
//! delivered. Nothing is recorded while the bus is down, so everything
//! missed goes out on the next connected tick. A reconnect forgets the
//! memory and sends the whole set again, retained.

use doco_core::{DoorClass, DoorId, DoorSnapshot, Scalars};
use doco_mqtt::{DoorTopics, MessageBus, OFF, OFFLINE, ON, ONLINE};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::thermal::format_celsius;

/// One payload destined for the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Message {
    fn retained(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain: true,
        }
    }
}

#[derive(Debug, Clone)]
struct DoorEntry {
    id: DoorId,
    class: DoorClass,
    enabled: bool,
    has_light: bool,
    topics: DoorTopics,
}

/// Diffing publisher
pub struct Publisher {
    availability: String,
    cpu_temperature: String,
    doors: Vec<DoorEntry>,
    last: HashMap<String, String>,
}

impl Publisher {
    pub fn new(config: &Config) -> Self {
        let base = config.mqtt.base_topic();
        Self {
            availability: config.mqtt.availability_topic(),
            cpu_temperature: config.mqtt.cpu_temperature_topic(),
            doors: config
                .doors
                .iter()
                .map(|d| DoorEntry {
                    id: d.id.clone(),
                    class: d.class,
                    enabled: d.enabled,
                    has_light: d.pins.light.is_some(),
                    topics: DoorTopics::new(&d.topic(base)),
                })
                .collect(),
            last: HashMap::new(),
        }
    }

    /// Command topics of the enabled doors
    pub fn command_topics(&self) -> Vec<String> {
        self.doors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.topics.command())
            .collect()
    }

    /// Door addressed by an inbound command topic
    pub fn door_for_command(&self, topic: &str) -> Option<&DoorId> {
        self.doors
            .iter()
            .find(|d| d.enabled && d.topics.is_command(topic))
            .map(|d| &d.id)
    }

    /// Every payload that describes the current state.
    ///
    /// Door availability follows configuration only. Process liveness is the
    /// device availability topic, the only one the last will covers.
    pub fn render(&self, snapshot: &[DoorSnapshot], scalars: &Scalars) -> Vec<Message> {
        let mut out = vec![Message::retained(self.availability.clone(), ONLINE)];

        for door in &self.doors {
            if !door.enabled {
                out.push(Message::retained(door.topics.availability(), OFFLINE));
                continue;
            }
            out.push(Message::retained(door.topics.availability(), ONLINE));

            let Some(current) = snapshot.iter().find(|s| s.id == door.id) else {
                continue;
            };
            if let Some(state) = current.runtime.state {
                out.push(Message::retained(door.topics.state(), state.published()));
                let held = door.class.held_state();
                out.push(Message::retained(
                    door.topics.topic(&held.as_str().to_ascii_lowercase()),
                    if state == held { ON } else { OFF },
                ));
            }
            if let Some(position) = current.runtime.position {
                out.push(Message::retained(door.topics.position(), position.to_string()));
            }
            if door.has_light {
                let on = current.light.unwrap_or(false);
                out.push(Message::retained(door.topics.light(), if on { ON } else { OFF }));
            }
        }

        if let Some(celsius) = scalars.cpu_temperature {
            out.push(Message {
                topic: self.cpu_temperature.clone(),
                payload: format_celsius(celsius),
                retain: false,
            });
        }
        out
    }

    /// Send what changed since the last delivery. Returns the number of
    /// messages handed to the bus.
    pub fn publish_changes(
        &mut self,
        bus: &dyn MessageBus,
        snapshot: &[DoorSnapshot],
        scalars: &Scalars,
    ) -> usize {
        if !bus.is_connected() {
            debug!("Bus disconnected, publish skipped");
            return 0;
        }

        let mut sent = 0;
        for message in self.render(snapshot, scalars) {
            if self.last.get(&message.topic) == Some(&message.payload) {
                continue;
            }
            match bus.publish(&message.topic, &message.payload, message.retain) {
                Ok(()) => {
                    debug!(topic = %message.topic, payload = %message.payload, "Published");
                    self.last.insert(message.topic, message.payload);
                    sent += 1;
                }
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "Publish failed, retrying next tick");
                    break;
                }
            }
        }
        sent
    }

    /// Forget what was delivered and send everything again
    pub fn republish_all(
        &mut self,
        bus: &dyn MessageBus,
        snapshot: &[DoorSnapshot],
        scalars: &Scalars,
    ) -> usize {
        self.last.clear();
        self.publish_changes(bus, snapshot, scalars)
    }

    /// Mark the device and every door offline before a graceful disconnect
    pub fn announce_offline(&mut self, bus: &dyn MessageBus) {
        let topics = self
            .doors
            .iter()
            .map(|d| d.topics.availability())
            .chain(std::iter::once(self.availability.clone()));
        for topic in topics {
            if let Err(e) = bus.publish(&topic, OFFLINE, true) {
                debug!(topic = %topic, error = %e, "Offline announcement not sent");
            }
        }
        self.last.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use doco_core::{DoorRuntimeState, DoorState};
    use doco_mqtt::BusError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory bus recording publishes and subscriptions
    #[derive(Default)]
    pub(crate) struct MockBus {
        pub connected: AtomicBool,
        pub published: Mutex<Vec<Message>>,
        pub subscribed: Mutex<Vec<String>>,
        pub reconnects: AtomicUsize,
    }

    impl MockBus {
        pub fn connected() -> Self {
            let bus = Self::default();
            bus.set_connected(true);
            bus
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        pub fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.published.lock().unwrap())
        }
    }

    impl MessageBus for MockBus {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), BusError> {
            if !self.is_connected() {
                return Err(BusError::Disconnected);
            }
            self.published.lock().unwrap().push(Message {
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            });
            Ok(())
        }

        fn subscribe(&self, topic: &str) -> Result<(), BusError> {
            if !self.is_connected() {
                return Err(BusError::Disconnected);
            }
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        fn request_reconnect(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn snapshot(state: DoorState, position: u8) -> Vec<DoorSnapshot> {
        vec![
            DoorSnapshot {
                id: DoorId::new("fence"),
                runtime: DoorRuntimeState::default(),
                light: None,
            },
            DoorSnapshot {
                id: DoorId::new("garage"),
                runtime: DoorRuntimeState {
                    state: Some(state),
                    position: Some(position),
                    ..Default::default()
                },
                light: None,
            },
        ]
    }

    fn payload<'a>(messages: &'a [Message], topic: &str) -> Option<&'a str> {
        messages
            .iter()
            .find(|m| m.topic == topic)
            .map(|m| m.payload.as_str())
    }

    #[test]
    fn test_render_topics() {
        let publisher = Publisher::new(&Config::default());
        let messages = publisher.render(&snapshot(DoorState::Venting, 10), &Scalars::default());

        assert_eq!(payload(&messages, "doco/availability"), Some("online"));
        assert_eq!(payload(&messages, "doco/garage/availability"), Some("online"));
        assert_eq!(payload(&messages, "doco/garage/state"), Some("OPEN"));
        assert_eq!(payload(&messages, "doco/garage/position"), Some("10"));
        assert_eq!(payload(&messages, "doco/garage/venting"), Some("ON"));
        // No estimate yet for the fence
        assert_eq!(payload(&messages, "doco/fence/state"), None);
        assert_eq!(payload(&messages, "doco/fence/half"), None);
        assert_eq!(payload(&messages, "doco/cputemperature"), None);
        assert!(messages.iter().all(|m| m.retain));
    }

    #[test]
    fn test_only_changes_are_sent() {
        let mut publisher = Publisher::new(&Config::default());
        let bus = MockBus::connected();
        let scalars = Scalars {
            cpu_temperature: Some(47.25),
            ..Default::default()
        };

        let first = publisher.publish_changes(&bus, &snapshot(DoorState::Closed, 0), &scalars);
        assert_eq!(first, bus.take().len());
        assert_eq!(publisher.publish_changes(&bus, &snapshot(DoorState::Closed, 0), &scalars), 0);

        publisher.publish_changes(&bus, &snapshot(DoorState::Opening, 30), &scalars);
        let sent = bus.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(payload(&sent, "doco/garage/state"), Some("OPENING"));
        assert_eq!(payload(&sent, "doco/garage/position"), Some("30"));
    }

    #[test]
    fn test_cpu_temperature_on_change() {
        let mut publisher = Publisher::new(&Config::default());
        let bus = MockBus::connected();
        let mut scalars = Scalars {
            cpu_temperature: Some(48.3),
            ..Default::default()
        };
        publisher.publish_changes(&bus, &[], &scalars);
        let sent = bus.take();
        let cpu = sent.iter().find(|m| m.topic == "doco/cputemperature").unwrap();
        assert_eq!(cpu.payload, "48.3");
        assert!(!cpu.retain);

        assert_eq!(publisher.publish_changes(&bus, &[], &scalars), 0);
        scalars.cpu_temperature = Some(49.0);
        publisher.publish_changes(&bus, &[], &scalars);
        assert_eq!(payload(&bus.take(), "doco/cputemperature"), Some("49.0"));
    }

    #[test]
    fn test_disconnected_then_reconnected() {
        let mut publisher = Publisher::new(&Config::default());
        let bus = MockBus::default();
        let scalars = Scalars::default();

        assert_eq!(publisher.publish_changes(&bus, &snapshot(DoorState::Open, 100), &scalars), 0);
        assert!(bus.take().is_empty());

        bus.set_connected(true);
        publisher.republish_all(&bus, &snapshot(DoorState::Open, 100), &scalars);
        let sent = bus.take();
        assert_eq!(payload(&sent, "doco/garage/state"), Some("OPEN"));
        assert_eq!(payload(&sent, "doco/garage/position"), Some("100"));
        assert_eq!(payload(&sent, "doco/garage/venting"), Some("OFF"));
        assert_eq!(payload(&sent, "doco/garage/availability"), Some("online"));
        assert!(sent.iter().all(|m| m.retain));

        // Already delivered, but a reconnect sends it all again
        let again = publisher.republish_all(&bus, &snapshot(DoorState::Open, 100), &scalars);
        assert_eq!(again, sent.len());
    }

    #[test]
    fn test_disabled_door_and_light() {
        let mut config = Config::default();
        config.doors[1].enabled = false;
        config.doors[0].pins.light = Some(5);
        let publisher = Publisher::new(&config);

        let mut doors = snapshot(DoorState::Closed, 0);
        doors[1].light = Some(true);
        let messages = publisher.render(&doors, &Scalars::default());
        assert_eq!(payload(&messages, "doco/fence/availability"), Some("offline"));
        assert_eq!(payload(&messages, "doco/garage/light"), Some("ON"));

        assert_eq!(publisher.command_topics(), vec!["doco/garage/command".to_string()]);
        assert_eq!(publisher.door_for_command("doco/fence/command"), None);
        assert_eq!(
            publisher.door_for_command("doco/garage/command"),
            Some(&DoorId::new("garage"))
        );
    }

    #[test]
    fn test_device_availability_is_the_last_will() {
        let config = Config::default();
        let publisher = Publisher::new(&config);
        let messages = publisher.render(&snapshot(DoorState::Open, 100), &Scalars::default());

        let will = config.mqtt.to_bus_config().last_will_topic;
        assert_eq!(messages[0].topic, will);
        assert_eq!(messages[0].payload, "online");
        assert!(messages[1..].iter().all(|m| m.topic != will));
    }

    #[test]
    fn test_announce_offline() {
        let mut publisher = Publisher::new(&Config::default());
        let bus = MockBus::connected();
        publisher.announce_offline(&bus);
        let sent = bus.take();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.payload == "offline" && m.retain));
        assert_eq!(sent.last().map(|m| m.topic.as_str()), Some("doco/availability"));
    }
}
