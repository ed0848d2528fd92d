// src/io/testing.rs
//
// Test doubles for the device and enumeration seams.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::ports::{PortDescriptor, PortEnumerator};
use super::serial::{ConnectionConfig, DeviceOpener, SerialLink};
use crate::error::MonitorError;

// ============================================================================
// Ports
// ============================================================================

/// Enumerator whose snapshot is set by the test. `None` makes enumeration fail.
pub struct FakePorts {
    ports: Mutex<Option<Vec<PortDescriptor>>>,
}

impl FakePorts {
    pub fn new(ids: &[&str]) -> Self {
        let fake = FakePorts {
            ports: Mutex::new(None),
        };
        fake.set(ids);
        fake
    }

    pub fn failing() -> Self {
        FakePorts {
            ports: Mutex::new(None),
        }
    }

    /// Make enumeration fail until the next `set`.
    pub fn fail(&self) {
        *self.ports.lock().unwrap() = None;
    }

    pub fn set(&self, ids: &[&str]) {
        let ports = ids.iter().map(|id| PortDescriptor::new(*id, "fake")).collect();
        *self.ports.lock().unwrap() = Some(ports);
    }
}

impl PortEnumerator for FakePorts {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, MonitorError> {
        self.ports
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MonitorError::Enumeration("scripted failure".to_string()))
    }
}

// ============================================================================
// Device
// ============================================================================

enum Step {
    Data(Vec<u8>),
    Empty,
    Fail(io::ErrorKind),
}

/// Feeds reads into a `ScriptedLink` from the test thread.
#[derive(Clone)]
pub struct LinkScript {
    tx: std_mpsc::Sender<Step>,
}

impl LinkScript {
    pub fn data(&self, bytes: &[u8]) {
        let _ = self.tx.send(Step::Data(bytes.to_vec()));
    }

    /// A read that returns `Ok(0)`.
    pub fn empty_read(&self) {
        let _ = self.tx.send(Step::Empty);
    }

    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.tx.send(Step::Fail(kind));
    }
}

/// Device link driven by a `LinkScript`. Reads wait up to `wait` for the next
/// step and time out otherwise, like a serial port with a read timeout.
struct ScriptedLink {
    rx: std_mpsc::Receiver<Step>,
    carry: VecDeque<u8>,
    wait: Duration,
    released: Arc<AtomicUsize>,
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.carry.is_empty() {
            let n = buf.len().min(self.carry.len());
            for (slot, byte) in buf.iter_mut().zip(self.carry.drain(..n)) {
                *slot = byte;
            }
            return Ok(n);
        }

        match self.rx.recv_timeout(self.wait) {
            Ok(Step::Data(bytes)) => {
                self.carry.extend(bytes);
                self.read(buf)
            }
            Ok(Step::Empty) => Ok(0),
            Ok(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(self.wait);
                Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
            }
        }
    }
}

impl Drop for ScriptedLink {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opener that hands out scripted links and counts acquire/release calls.
pub struct ScriptedOpener {
    acquired: AtomicUsize,
    released: Arc<AtomicUsize>,
    failure: Mutex<Option<String>>,
    scripts: Mutex<VecDeque<std_mpsc::Receiver<Step>>>,
    wait: Duration,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        ScriptedOpener {
            acquired: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            failure: Mutex::new(None),
            scripts: Mutex::new(VecDeque::new()),
            wait: Duration::from_millis(10),
        }
    }

    /// Make every subsequent open fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Queue a link for the next successful open and return its script.
    pub fn script(&self) -> LinkScript {
        let (tx, rx) = std_mpsc::channel();
        self.scripts.lock().unwrap().push_back(rx);
        LinkScript { tx }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> usize {
        self.acquired() - self.released()
    }
}

impl DeviceOpener for ScriptedOpener {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialLink>, MonitorError> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(MonitorError::Connection {
                port: config.port.clone(),
                message,
            });
        }

        // An unscripted link just times out until closed
        let rx = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            let (_tx, rx) = std_mpsc::channel();
            rx
        });

        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedLink {
            rx,
            carry: VecDeque::new(),
            wait: self.wait,
            released: self.released.clone(),
        }))
    }
}
