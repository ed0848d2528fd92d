// src/io/serial/reader.rs
//
// Background acquisition worker.
// Owns the open device on a blocking thread, frames and filters incoming
// bytes, and hands completed lines to the interactive context over an
// unbounded channel.

use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::framer::LineFramer;
use super::utils::{self, Parity};
use crate::error::MonitorError;
use crate::filter::KeywordFilter;
use crate::io::{EventSender, SessionEvent, WorkerState};

/// Bytes pulled from the device per read
const READ_BUFFER_SIZE: usize = 256;

// ============================================================================
// Types and Configuration
// ============================================================================

/// Settings for one serial session. Framing is fixed at 8-N-1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    /// Upper bound on a single read; also bounds how long a close request waits
    pub read_timeout: Duration,
}

impl ConnectionConfig {
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn new(port: impl Into<String>, baud_rate: u32) -> Result<Self, MonitorError> {
        let port = port.into();
        if port.trim().is_empty() {
            return Err(MonitorError::InvalidConfig("no serial port selected".to_string()));
        }
        if baud_rate == 0 {
            return Err(MonitorError::InvalidConfig("baud rate must be positive".to_string()));
        }
        Ok(ConnectionConfig {
            port,
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout.max(Duration::from_millis(1));
        self
    }

    /// Parse an operator-entered baud rate. Any positive integer is accepted,
    /// including non-standard rates such as 1000000.
    pub fn parse_baud(text: &str) -> Result<u32, MonitorError> {
        match text.trim().parse::<u32>() {
            Ok(baud) if baud > 0 => Ok(baud),
            _ => Err(MonitorError::InvalidConfig(format!("invalid baud rate: {}", text.trim()))),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} at {} baud ({})",
            self.port,
            self.baud_rate,
            utils::frame_format(self.data_bits, self.parity, self.stop_bits)
        )
    }
}

/// Byte source for one open session. Reads must return within the
/// configured read timeout, with `TimedOut` when nothing arrived.
pub trait SerialLink: Read + Send {}

impl<T: Read + Send + ?Sized> SerialLink for T {}

/// Acquires a device for a session. Every failure (busy, not found,
/// permission denied) is reported as `MonitorError::Connection`.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialLink>, MonitorError>;
}

/// Opens real ports through the serialport crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOpener;

impl DeviceOpener for SystemOpener {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialLink>, MonitorError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(utils::to_serialport_data_bits(config.data_bits))
            .stop_bits(utils::to_serialport_stop_bits(config.stop_bits))
            .parity(utils::to_serialport_parity(config.parity))
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| MonitorError::Connection {
                port: config.port.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::new(port))
    }
}

// ============================================================================
// Acquisition Worker
// ============================================================================

/// Owns at most one open session and its background read loop.
///
/// Lifecycle: Idle -> Connecting -> Reading -> Closing -> Idle, with Faulted
/// reachable from Connecting (open failed) or Reading (I/O error).
pub struct AcquisitionWorker {
    opener: Arc<dyn DeviceOpener>,
    events: EventSender,
    state: Arc<Mutex<WorkerState>>,
    cancel_flag: Arc<AtomicBool>,
    task_handle: Option<JoinHandle<()>>,
    port: Option<String>,
    session: Option<u64>,
    next_session: u64,
}

impl AcquisitionWorker {
    pub fn new(opener: Arc<dyn DeviceOpener>, events: EventSender) -> Self {
        Self {
            opener,
            events,
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            task_handle: None,
            port: None,
            session: None,
            next_session: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, next: WorkerState) {
        match self.state.lock() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Id of the session currently owned by the worker, if any.
    pub fn session(&self) -> Option<u64> {
        self.session
    }

    /// Port of the current session, if any.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Acquire the device and start the read loop.
    ///
    /// Lines that do not pass `filter` are dropped in the background.
    /// Returns the new session id.
    pub async fn open(
        &mut self,
        config: ConnectionConfig,
        filter: KeywordFilter,
    ) -> Result<u64, MonitorError> {
        match self.state() {
            state if state.is_active() => {
                return Err(MonitorError::AlreadyOpen(
                    self.port.clone().unwrap_or_else(|| "unknown port".to_string()),
                ));
            }
            WorkerState::Faulted(_) => self.close().await,
            _ => {}
        }

        self.set_state(WorkerState::Connecting);
        tlog!("[Serial] Opening {}", config.describe());

        let opener = self.opener.clone();
        let open_config = config.clone();
        let opened = tokio::task::spawn_blocking(move || opener.open(&open_config))
            .await
            .unwrap_or_else(|e| {
                Err(MonitorError::Connection {
                    port: config.port.clone(),
                    message: format!("open task failed: {}", e),
                })
            });

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                tlog!("[Serial] {}", e);
                self.set_state(WorkerState::Faulted(e.to_string()));
                return Err(e);
            }
        };

        self.next_session += 1;
        let session = self.next_session;
        self.session = Some(session);
        self.port = Some(config.port.clone());

        // Fresh flag per session so a late close of an old loop cannot leak into this one
        self.cancel_flag = Arc::new(AtomicBool::new(false));
        self.set_state(WorkerState::Reading);

        tlog!("[Serial:{}] Opened {}", session, config.describe());

        let read_loop = ReadLoop {
            session,
            link,
            filter,
            cancel_flag: self.cancel_flag.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
        };
        self.task_handle = Some(tokio::task::spawn_blocking(move || read_loop.run()));

        Ok(session)
    }

    /// Stop the read loop, discard any unterminated line, release the device.
    /// Closing an idle worker is a no-op; closing a faulted worker returns it to Idle.
    pub async fn close(&mut self) {
        let Some(handle) = self.task_handle.take() else {
            if self.state() != WorkerState::Idle {
                self.set_state(WorkerState::Idle);
            }
            self.session = None;
            self.port = None;
            return;
        };

        self.set_state(WorkerState::Closing);
        self.cancel_flag.store(true, Ordering::SeqCst);

        if let Err(e) = handle.await {
            tlog!("[Serial] Read task panicked: {:?}", e);
        }

        if let Some(port) = self.port.take() {
            tlog!("[Serial] {} closed", port);
        }
        self.session = None;
        self.set_state(WorkerState::Idle);
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Everything the background thread owns for one session.
struct ReadLoop {
    session: u64,
    link: Box<dyn SerialLink>,
    filter: KeywordFilter,
    cancel_flag: Arc<AtomicBool>,
    state: Arc<Mutex<WorkerState>>,
    events: EventSender,
}

impl ReadLoop {
    fn run(self) {
        let ReadLoop {
            session,
            mut link,
            filter,
            cancel_flag,
            state,
            events,
        } = self;

        let mut framer = LineFramer::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut total_bytes_read: u64 = 0;

        let outcome: Result<(), String> = loop {
            if cancel_flag.load(Ordering::SeqCst) {
                break Ok(());
            }

            match link.read(&mut buf) {
                Ok(0) => {
                    // Nothing yet
                }
                Ok(n) => {
                    total_bytes_read += n as u64;
                    for line in framer.feed(&buf[..n]) {
                        if !filter.accepts(&line.text) {
                            continue;
                        }
                        tlog_file!("[Serial:{}] RECV: {}", session, line.text);
                        // Fire-and-forget; a gone consumer just means nobody is watching
                        let _ = events.send(SessionEvent::Line { session, line });
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    // Timeout is expected for serial reads
                }
                Err(e) => break Err(e.to_string()),
            }
        };

        let dropped = framer.flush();
        if dropped > 0 {
            tlog!("[Serial:{}] Discarded {} bytes of unterminated line", session, dropped);
        }

        // Release the device before anyone hears about the outcome
        drop(link);

        match outcome {
            Ok(()) => {
                tlog!("[Serial:{}] Stopped after {} bytes", session, total_bytes_read);
            }
            Err(message) => {
                tlog!("[Serial:{}] Read error after {} bytes: {}", session, total_bytes_read, message);
                let message = MonitorError::IoFault(message).to_string();
                match state.lock() {
                    Ok(mut guard) => *guard = WorkerState::Faulted(message.clone()),
                    Err(poisoned) => *poisoned.into_inner() = WorkerState::Faulted(message.clone()),
                }
                let _ = events.send(SessionEvent::Faulted { session, message });
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
