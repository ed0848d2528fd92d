// src/session.rs
//
// Session controller: connects operator commands, port changes and the
// acquisition worker, and owns the display on the interactive context.
//
// Everything in here runs on one task. Lines, faults and port changes arrive
// over a single channel and are handled one at a time, in order.

use chrono::Local;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::commands::{SessionCommand, HELP_TEXT};
use crate::display::{default_export_name, DisplaySink, ExportScope};
use crate::error::MonitorError;
use crate::filter::KeywordFilter;
use crate::io::{
    event_channel, list_ports, port_listing, AcquisitionWorker, ConnectionConfig, DeviceOpener,
    EventReceiver, EventSender, PortDelta, PortDescriptor, PortEntry, PortEnumerator, PortWatcher,
    SessionEvent, WorkerState,
};
use crate::settings::{SettingsStore, UnplugPolicy};

/// Events for the interactive surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum UiEvent {
    PortsChanged(Vec<PortEntry>),
    /// A received line that is visible under the current view keyword
    Line(String),
    Connected { port: String, baud_rate: u32 },
    Disconnected { port: String },
    /// The connection could not be opened or failed while reading
    Faulted(String),
    Warning(String),
    Error(String),
    Notice(String),
}

pub type UiSender = mpsc::UnboundedSender<UiEvent>;

/// The most recently closed session, kept so a fault still queued behind the
/// close is reported once instead of being dropped.
#[derive(Debug)]
struct ClosedSession {
    session: u64,
    port: String,
    fault_reported: bool,
}

pub struct SessionController {
    worker: AcquisitionWorker,
    sink: DisplaySink,
    live_filter: KeywordFilter,
    include_text: String,
    exclude_text: String,
    settings: SettingsStore,
    enumerator: Arc<dyn PortEnumerator>,
    ports: BTreeSet<PortDescriptor>,
    watcher: Option<PortWatcher>,
    last_closed: Option<ClosedSession>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    ui: UiSender,
    export_dir: PathBuf,
}

impl SessionController {
    /// `ports` is the initial snapshot; the watcher compares its first poll against it.
    pub fn new(
        opener: Arc<dyn DeviceOpener>,
        enumerator: Arc<dyn PortEnumerator>,
        ports: BTreeSet<PortDescriptor>,
        settings: SettingsStore,
        ui: UiSender,
    ) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            worker: AcquisitionWorker::new(opener, events_tx.clone()),
            sink: DisplaySink::new(),
            live_filter: KeywordFilter::default(),
            include_text: String::new(),
            exclude_text: String::new(),
            settings,
            enumerator,
            ports,
            watcher: None,
            last_closed: None,
            events_tx,
            events_rx,
            ui,
            export_dir: PathBuf::from("."),
        }
    }

    /// Directory used for exports without an explicit path.
    pub fn set_export_dir(&mut self, dir: PathBuf) {
        self.export_dir = dir;
    }

    /// Set the live include/exclude lists before any command arrives.
    pub fn set_live_filter(&mut self, include: &str, exclude: &str) {
        self.include_text = include.to_string();
        self.exclude_text = exclude.to_string();
        self.live_filter = KeywordFilter::parse(include, exclude);
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn display(&self) -> &DisplaySink {
        &self.sink
    }

    pub fn display_mut(&mut self) -> &mut DisplaySink {
        &mut self.sink
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn ports(&self) -> &BTreeSet<PortDescriptor> {
        &self.ports
    }

    /// Start the process-wide port poller. Does nothing if it is already running.
    pub fn start_watcher(&mut self) {
        if self.watcher.as_ref().is_some_and(|w| w.is_running()) {
            return;
        }
        self.watcher = Some(PortWatcher::start(
            self.enumerator.clone(),
            self.ports.clone(),
            self.settings.settings().port_poll_interval(),
            self.events_tx.clone(),
        ));
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui.send(event);
    }

    /// The port shown as the target in port listings.
    fn target_port(&self) -> Option<String> {
        self.worker
            .port()
            .map(str::to_string)
            .or_else(|| self.settings.settings().remembered_port().map(str::to_string))
    }

    fn port_listing(&self) -> Vec<PortEntry> {
        port_listing(&self.ports, self.target_port().as_deref())
    }

    // ========================================================================
    // Main loop
    // ========================================================================

    /// Process commands and background events until Quit or the command
    /// channel closes, then shut down.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        self.emit(UiEvent::PortsChanged(self.port_listing()));

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Next background event, for callers driving the controller by hand.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Close the session (waiting for the reader to finish) and stop the port poller.
    pub async fn shutdown(&mut self) {
        self.worker.close().await;
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop().await;
        }
        self.watcher = None;
        tlog!("[session] Shut down");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Handle one operator command. Returns false when the controller should stop.
    pub async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Connect { port, baud_rate } => {
                // Failures are already reported as UiEvent::Faulted
                let _ = self.connect(port, baud_rate).await;
            }
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::Clear => {
                self.sink.clear();
                tlog!("[session] Display cleared by operator");
                self.emit(UiEvent::Notice("All received data cleared".to_string()));
            }
            SessionCommand::SetKeyword(keyword) => {
                let shown = self.sink.set_keyword(&keyword);
                let notice = if self.sink.keyword().is_empty() {
                    format!("View filter cleared ({} lines)", shown)
                } else {
                    format!("View filter '{}' matches {} of {} lines", self.sink.keyword(), shown, self.sink.len())
                };
                self.emit(UiEvent::Notice(notice));
            }
            SessionCommand::SetInclude(text) => {
                let exclude = self.exclude_text.clone();
                self.set_live_filter(&text, &exclude);
                self.emit(UiEvent::Notice(self.live_filter.describe()));
            }
            SessionCommand::SetExclude(text) => {
                let include = self.include_text.clone();
                self.set_live_filter(&include, &text);
                self.emit(UiEvent::Notice(self.live_filter.describe()));
            }
            SessionCommand::Export { scope, path } => {
                let _ = self.export(scope, path);
            }
            SessionCommand::ListPorts => self.refresh_ports().await,
            SessionCommand::Help => self.emit(UiEvent::Notice(HELP_TEXT.to_string())),
            SessionCommand::Quit => {
                tlog!("[session] Quit requested");
                return false;
            }
        }
        true
    }

    /// Open a session. An open session is closed first, so this also
    /// reconfigures (new port or baud rate).
    pub async fn connect(
        &mut self,
        port: Option<String>,
        baud_rate: Option<u32>,
    ) -> Result<u64, MonitorError> {
        let result = self.try_connect(port, baud_rate).await;
        if let Err(ref e) = result {
            self.emit(UiEvent::Faulted(e.to_string()));
        }
        result
    }

    async fn try_connect(
        &mut self,
        port: Option<String>,
        baud_rate: Option<u32>,
    ) -> Result<u64, MonitorError> {
        let settings = self.settings.settings();
        let port = port
            .filter(|p| !p.trim().is_empty())
            .or_else(|| settings.remembered_port().map(str::to_string))
            .ok_or_else(|| MonitorError::InvalidConfig("no serial port selected".to_string()))?;
        let baud_rate = baud_rate.unwrap_or(settings.default_baud_rate);
        let config = ConnectionConfig::new(port, baud_rate)?.with_read_timeout(settings.read_timeout());

        if self.worker.port().is_some() {
            tlog!("[session] Reconfiguring: closing current session first");
            self.disconnect().await;
        }

        if self.settings.settings().default_serial_port != config.port {
            let chosen = config.port.clone();
            if let Err(e) = self.settings.save_setting(|s| s.default_serial_port = chosen) {
                tlog!("[session] Could not remember port: {}", e);
            }
        }

        let session = self.worker.open(config.clone(), KeywordFilter::default()).await?;
        self.emit(UiEvent::Connected {
            port: config.port,
            baud_rate: config.baud_rate,
        });
        Ok(session)
    }

    /// Close the current session and wait for the reader to release the device.
    pub async fn disconnect(&mut self) {
        let port = self.worker.port().map(str::to_string);
        let session = self.worker.session();

        // A read fault may be queued behind this close; report it now
        let mut fault_reported = false;
        if let (Some(port), WorkerState::Faulted(message)) = (port.as_deref(), self.worker.state()) {
            self.emit(UiEvent::Faulted(format!("{}: {}", port, message)));
            fault_reported = true;
        }

        self.worker.close().await;
        if let (Some(session), Some(port)) = (session, port.clone()) {
            self.last_closed = Some(ClosedSession {
                session,
                port,
                fault_reported,
            });
        }
        match port {
            Some(port) => self.emit(UiEvent::Disconnected { port }),
            None => self.emit(UiEvent::Notice("Not connected".to_string())),
        }
    }

    /// Write the display buffer (or the visible subset) to `path`, or to a
    /// timestamped file in the export directory.
    pub fn export(&mut self, scope: ExportScope, path: Option<PathBuf>) -> Result<PathBuf, MonitorError> {
        let path = path.unwrap_or_else(|| self.export_dir.join(default_export_name(scope, Local::now())));
        match self.sink.export(scope, &path) {
            Ok(count) => {
                self.emit(UiEvent::Notice(format!("Saved {} lines to {}", count, path.display())));
                Ok(path)
            }
            Err(e) => {
                self.emit(UiEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn refresh_ports(&mut self) {
        let enumerator = self.enumerator.clone();
        self.ports = tokio::task::spawn_blocking(move || list_ports(enumerator.as_ref()))
            .await
            .unwrap_or_default();
        self.emit(UiEvent::PortsChanged(self.port_listing()));
    }

    // ========================================================================
    // Background events
    // ========================================================================

    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Line { line, .. } => {
                if !self.live_filter.accepts(&line.text) {
                    return;
                }
                let text = line.text;
                if self.sink.accept(text.clone()) {
                    self.emit(UiEvent::Line(text));
                }
            }
            SessionEvent::Faulted { session, message } => {
                if self.worker.session() != Some(session) {
                    self.report_closed_session_fault(session, &message);
                    return;
                }
                let port = self.worker.port().unwrap_or("serial port").to_string();
                // Reap the reader; the device is already released
                self.worker.close().await;
                self.emit(UiEvent::Faulted(format!("{}: {}", port, message)));
            }
            SessionEvent::PortsChanged { ports, delta } => {
                self.ports = ports;
                self.emit(UiEvent::PortsChanged(self.port_listing()));
                self.apply_unplug_policy(&delta).await;
            }
        }
    }

    /// A fault from a session the operator already closed. Reported once if it
    /// belongs to the last closed session and was not seen at close time.
    fn report_closed_session_fault(&mut self, session: u64, message: &str) {
        let text = match self.last_closed.as_mut() {
            Some(closed) if closed.session == session && !closed.fault_reported => {
                closed.fault_reported = true;
                format!("{}: {}", closed.port, message)
            }
            _ => {
                tlog!("[session] Ignoring fault from finished session {}", session);
                return;
            }
        };
        self.emit(UiEvent::Faulted(text));
    }

    async fn apply_unplug_policy(&mut self, delta: &PortDelta) {
        let Some(port) = self.worker.port().map(str::to_string) else {
            return;
        };
        if !delta.removes(&port) || self.worker.state() != WorkerState::Reading {
            return;
        }

        match self.settings.settings().unplug_policy {
            UnplugPolicy::Close => {
                tlog!("[session] {} was unplugged; closing session", port);
                self.disconnect().await;
                self.emit(UiEvent::Warning(format!("{} was unplugged; session closed", port)));
            }
            UnplugPolicy::Warn => {
                tlog!("[session] {} was unplugged; leaving session open", port);
                self.emit(UiEvent::Warning(format!("{} was unplugged", port)));
            }
        }
    }
}
