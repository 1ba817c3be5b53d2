use std::fmt;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::parser::ProtocolError;
use crate::record::{PolicyChangeEvent, PresenceEvent};

/// Capacity of each record channel between the reader task and the dispatcher.
/// A full channel blocks the reader, which in turn stops draining the backend pipe.
pub const EVENT_CHANNEL_CAPACITY: usize = 10;
pub const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// Out-of-band messages for the dispatch loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The dispatch loop should return.
    Shutdown(ShutdownReason),
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Interrupted(&'static str),
    /// The backend exited; carries its exit code when it had one.
    BackendExited(Option<i32>),
    /// Waiting on the backend failed.
    BackendFailed(String),
    /// The backend's output stopped matching the expected framing.
    ProtocolViolation(ProtocolError),
    /// Every control sender was dropped.
    ControlClosed,
}

impl ShutdownReason {
    /// Fatal reasons make the process exit with a failure code.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Interrupted(_) | Self::ControlClosed)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted(signal) => write!(f, "received {signal}"),
            Self::BackendExited(Some(code)) => write!(f, "backend exited with code {code}"),
            Self::BackendExited(None) => write!(f, "backend terminated by signal"),
            Self::BackendFailed(e) => write!(f, "backend failed: {e}"),
            Self::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            Self::ControlClosed => write!(f, "control channel closed"),
        }
    }
}

/// Producer half of the record channels, owned by the reader task.
#[derive(Clone)]
pub struct EventSenders {
    pub presence: mpsc::Sender<PresenceEvent>,
    pub policy: mpsc::Sender<PolicyChangeEvent>,
    pub lines: mpsc::Sender<String>,
}

/// Consumer half of the record channels, owned by the dispatcher.
pub struct EventReceivers {
    pub presence: mpsc::Receiver<PresenceEvent>,
    pub policy: mpsc::Receiver<PolicyChangeEvent>,
    pub lines: mpsc::Receiver<String>,
}

pub fn event_channels(capacity: usize) -> (EventSenders, EventReceivers) {
    let (presence_tx, presence_rx) = mpsc::channel(capacity);
    let (policy_tx, policy_rx) = mpsc::channel(capacity);
    let (lines_tx, lines_rx) = mpsc::channel(capacity);
    (
        EventSenders {
            presence: presence_tx,
            policy: policy_tx,
            lines: lines_tx,
        },
        EventReceivers {
            presence: presence_rx,
            policy: policy_rx,
            lines: lines_rx,
        },
    )
}
