//! Topic layout and payload vocabulary

/// Availability payloads
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Switch payloads
pub const ON: &str = "ON";
pub const OFF: &str = "OFF";

const COMMAND_SUFFIX: &str = "/command";

/// Topics below one door's prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorTopics {
    prefix: String,
}

impl DoorTopics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn command(&self) -> String {
        format!("{}{}", self.prefix, COMMAND_SUFFIX)
    }

    pub fn state(&self) -> String {
        self.topic("state")
    }

    pub fn position(&self) -> String {
        self.topic("position")
    }

    pub fn availability(&self) -> String {
        self.topic("availability")
    }

    pub fn light(&self) -> String {
        self.topic("light")
    }

    /// Any other leaf below the prefix (`venting`, `half`, ...)
    pub fn topic(&self, leaf: &str) -> String {
        format!("{}/{}", self.prefix, leaf)
    }

    /// Whether `topic` is this door's command topic
    pub fn is_command(&self, topic: &str) -> bool {
        topic
            .strip_suffix(COMMAND_SUFFIX)
            .is_some_and(|prefix| prefix == self.prefix)
    }
}
