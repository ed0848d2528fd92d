// src/io/mod.rs
//
// Device-facing side of the monitor: port enumeration and the serial
// acquisition worker, plus the event types they hand to the interactive
// context.

pub mod ports;
pub mod serial;
#[cfg(test)]
pub(crate) mod testing;

pub use ports::{
    list_ports, port_listing, PortDelta, PortDescriptor, PortEntry, PortEnumerator, PortWatcher,
    SystemPorts,
};
pub use serial::{
    AcquisitionWorker, ConnectionConfig, DeviceOpener, Line, LineFramer, Parity, SerialLink,
    SystemOpener,
};

use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// Current state of the acquisition worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum WorkerState {
    Idle,
    Connecting,
    Reading,
    Closing,
    /// The session ended on an error; the device has been released.
    Faulted(String),
}

impl WorkerState {
    /// Whether a background read loop may still be running.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerState::Connecting | WorkerState::Reading | WorkerState::Closing)
    }
}

/// Messages handed from background contexts to the interactive context.
/// Delivered in the order they were produced over a single unbounded channel.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A completed line that passed the worker's filter
    Line { session: u64, line: Line },
    /// The session ended on an I/O error. Emitted at most once per session.
    Faulted { session: u64, message: String },
    /// The port snapshot changed
    PortsChanged {
        ports: BTreeSet<PortDescriptor>,
        delta: PortDelta,
    },
}

/// Producer half of the handoff. Sending never blocks.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!WorkerState::Idle.is_active());
        assert!(WorkerState::Connecting.is_active());
        assert!(WorkerState::Reading.is_active());
        assert!(WorkerState::Closing.is_active());
        assert!(!WorkerState::Faulted("gone".to_string()).is_active());
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&WorkerState::Faulted("unplugged".to_string())).unwrap();
        assert_eq!(json, r#"{"type":"Faulted","message":"unplugged"}"#);
    }
}
