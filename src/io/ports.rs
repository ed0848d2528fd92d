// src/io/ports.rs
//
// Serial port enumeration and hot-plug detection.
//
// `list_ports` is a best-effort snapshot that never fails. `PortWatcher` skips
// failed enumeration passes instead of reporting every port as removed. It is
// the single process-wide poller: started once at init, stopped at shutdown,
// and it only ever reports changes. Closing a session whose port vanished is
// the controller's decision.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::serial::utils::port_label;
use super::{EventSender, SessionEvent};
use crate::error::MonitorError;

// ============================================================================
// Types
// ============================================================================

/// A serial device as seen by one enumeration pass.
/// Equality, ordering and hashing use `id` only.
#[derive(Clone, Debug, Serialize)]
pub struct PortDescriptor {
    /// Stable device path or name, e.g. "/dev/ttyUSB0" or "COM3"
    pub id: String,
    /// Display label, e.g. "CP2102 USB to UART (10c4:ea60)"
    pub label: String,
}

impl PortDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl PartialEq for PortDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PortDescriptor {}

impl Hash for PortDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for PortDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PortDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// Ports that appeared and disappeared between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PortDelta {
    pub added: Vec<PortDescriptor>,
    pub removed: Vec<PortDescriptor>,
}

impl PortDelta {
    pub fn between(previous: &BTreeSet<PortDescriptor>, current: &BTreeSet<PortDescriptor>) -> Self {
        PortDelta {
            added: current.difference(previous).cloned().collect(),
            removed: previous.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn removes(&self, port_id: &str) -> bool {
        self.removed.iter().any(|p| p.id == port_id)
    }
}

/// One row of the operator-facing port list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortEntry {
    pub port: PortDescriptor,
    /// False for a remembered target port that is not currently attached
    pub present: bool,
}

// ============================================================================
// Enumeration
// ============================================================================

/// Source of port snapshots. `SystemPorts` in production, scripted in tests.
pub trait PortEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, MonitorError>;
}

/// Enumerates ports through the serialport crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    /// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
    /// The tty devices block on open waiting for carrier detect.
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, MonitorError> {
        let ports = serialport::available_ports()
            .map_err(|e| MonitorError::Enumeration(e.to_string()))?;

        Ok(ports
            .into_iter()
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| PortDescriptor {
                label: port_label(&p.port_type),
                id: p.port_name,
            })
            .collect())
    }
}

/// Best-effort current snapshot. An enumeration failure yields an empty set.
pub fn list_ports(enumerator: &dyn PortEnumerator) -> BTreeSet<PortDescriptor> {
    match enumerator.enumerate() {
        Ok(ports) => ports.into_iter().collect(),
        Err(e) => {
            tlog!("[ports] {}", e);
            BTreeSet::new()
        }
    }
}

/// Build the list shown to the operator. The remembered target port is
/// always included, flagged as not present when it is detached.
pub fn port_listing(ports: &BTreeSet<PortDescriptor>, target: Option<&str>) -> Vec<PortEntry> {
    let mut entries: Vec<PortEntry> = ports
        .iter()
        .map(|p| PortEntry {
            port: p.clone(),
            present: true,
        })
        .collect();

    if let Some(target) = target.filter(|t| !t.is_empty()) {
        if !ports.iter().any(|p| p.id == target) {
            entries.push(PortEntry {
                port: PortDescriptor::new(target, "disconnected"),
                present: false,
            });
            entries.sort_by(|a, b| a.port.cmp(&b.port));
        }
    }

    entries
}

// ============================================================================
// Watcher
// ============================================================================

/// Background poller that reports attach/detach transitions as
/// `SessionEvent::PortsChanged`.
pub struct PortWatcher {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PortWatcher {
    /// Start polling. `previous` is the snapshot the first comparison is made against.
    pub fn start(
        enumerator: Arc<dyn PortEnumerator>,
        previous: BTreeSet<PortDescriptor>,
        interval: Duration,
        events: EventSender,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut previous = previous;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tlog!("[ports] Watching for port changes every {:?}", interval);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                // Enumeration can touch sysfs/registry, keep it off the async workers
                let enumerator = enumerator.clone();
                let current: BTreeSet<PortDescriptor> =
                    match tokio::task::spawn_blocking(move || enumerator.enumerate()).await {
                        Ok(Ok(ports)) => ports.into_iter().collect(),
                        // A failed pass says nothing about which ports are attached
                        Ok(Err(e)) => {
                            tlog!("[ports] {}; keeping previous snapshot", e);
                            continue;
                        }
                        Err(e) => {
                            tlog!("[ports] Enumeration task failed: {:?}", e);
                            continue;
                        }
                    };

                let delta = PortDelta::between(&previous, &current);
                if delta.is_empty() {
                    continue;
                }

                tlog!(
                    "[ports] Port list changed: +{:?} -{:?}",
                    delta.added.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
                    delta.removed.iter().map(|p| p.id.as_str()).collect::<Vec<_>>()
                );

                previous = current.clone();
                if events.send(SessionEvent::PortsChanged { ports: current, delta }).is_err() {
                    // Nobody is listening any more
                    break;
                }
            }

            tlog!("[ports] Watcher stopped");
        });

        PortWatcher {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the poller and wait for it to exit. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
