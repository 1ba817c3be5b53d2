//! Typed device records reconstructed from the backend's `watch` stream.

/// The `event=` attribute of a `PresenceChanged` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceKind {
    /// Device was already connected when the backend started.
    Present,
    /// Device was plugged in.
    Insert,
    /// Device descriptor changed.
    Update,
    /// Device was unplugged.
    Remove,
    /// Any event name this daemon does not model.
    Other(String),
}

impl PresenceKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "Present" => Self::Present,
            "Insert" => Self::Insert,
            "Update" => Self::Update,
            "Remove" => Self::Remove,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Default for PresenceKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

/// A device appeared, disappeared, or changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceEvent {
    pub id: u32,
    pub kind: PresenceKind,
    /// Policy target currently applied to the device (`allow`, `block`, `reject`).
    pub target: String,
    /// Raw rule text describing the device.
    pub device_rule: String,
}

impl PresenceEvent {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Applies one `key=value` attribute. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "event" => self.kind = PresenceKind::parse(value),
            "target" => self.target = value.to_string(),
            "device_rule" => self.device_rule = value.to_string(),
            _ => {}
        }
    }
}

/// The policy target applied to a device changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyChangeEvent {
    pub id: u32,
    pub target_old: String,
    pub target_new: String,
    pub device_rule: String,
}

impl PolicyChangeEvent {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Applies one `key=value` attribute. Unknown keys (e.g. `rule_id`) are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "target_old" => self.target_old = value.to_string(),
            "target_new" => self.target_new = value.to_string(),
            "device_rule" => self.device_rule = value.to_string(),
            _ => {}
        }
    }

    /// Returns true when the record describes an actual target transition.
    pub fn is_change(&self) -> bool {
        self.target_old != self.target_new
    }
}

/// One fully parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Presence(PresenceEvent),
    PolicyChange(PolicyChangeEvent),
}
