// src/error.rs
//
// Error taxonomy for the acquisition pipeline.
// Background faults never cross the worker boundary as errors; they are
// converted to `SessionEvent::Faulted` and only surface here when the
// controller reports them.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Port enumeration failed. `list_ports` swallows this and yields an empty set.
    #[error("Failed to enumerate ports: {0}")]
    Enumeration(String),

    /// The device could not be acquired (busy, not found, permission denied).
    #[error("Failed to open {port}: {message}")]
    Connection { port: String, message: String },

    /// Failure while a session was reading.
    #[error("Read error: {0}")]
    IoFault(String),

    /// Export target could not be written. The display buffer is untouched.
    #[error("Failed to export to {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid connection settings: {0}")]
    InvalidConfig(String),

    #[error("A session is already open on {0}")]
    AlreadyOpen(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_message() {
        let err = MonitorError::Connection {
            port: "/dev/ttyUSB0".to_string(),
            message: "Device or resource busy".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to open /dev/ttyUSB0: Device or resource busy");
    }

    #[test]
    fn test_export_error_keeps_source() {
        let err = MonitorError::Export {
            path: PathBuf::from("/nope/out.txt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/nope/out.txt"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
