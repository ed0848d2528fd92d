// src/console.rs
//
// Terminal front end: command-line parsing, the `ports` and `monitor`
// subcommands, and rendering of controller events.
//
// The console is the thin interactive surface. It turns stdin lines into
// `SessionCommand`s and prints `UiEvent`s; all session logic lives in the
// controller.

use clap::{Args, Parser, Subcommand};
use crossterm::style::{self, Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::QueueableCommand;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::commands::{parse_command, SessionCommand};
use crate::io::{list_ports, port_listing, PortEntry, SystemOpener, SystemPorts};
use crate::logging;
use crate::session::{SessionController, UiEvent};
use crate::settings::{default_log_dir, default_settings_path, SettingsStore};

#[derive(Parser, Debug)]
#[command(name = "serialtap")]
#[command(about = "Serial port monitor with line framing, keyword filtering and export")]
#[command(version)]
pub struct Cli {
    /// Settings file (default: <config dir>/serialtap/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for session log files
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Echo diagnostic log lines to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the serial ports currently attached
    Ports,
    /// Open a port and stream received lines to stdout
    Monitor(MonitorArgs),
}

#[derive(Args, Debug, Default)]
pub struct MonitorArgs {
    /// Port to open (default: the last port used)
    #[arg(long, short)]
    pub port: Option<String>,

    /// Baud rate (default: from settings)
    #[arg(long, short)]
    pub baud: Option<u32>,

    /// Keep only lines containing one of these keywords (`;`-separated)
    #[arg(long, default_value = "")]
    pub include: String,

    /// Drop lines containing one of these keywords (`;`-separated)
    #[arg(long, default_value = "")]
    pub exclude: String,

    /// Initial view keyword
    #[arg(long)]
    pub filter: Option<String>,

    /// Directory for exports written without an explicit path
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
}

// ============================================================================
// Entry points
// ============================================================================

pub async fn run_cli(cli: Cli) -> Result<(), String> {
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = SettingsStore::load(&settings_path).map_err(|e| e.to_string())?;

    logging::set_console_echo(cli.verbose);
    let log_dir = cli.log_dir.clone().unwrap_or_else(default_log_dir);
    let pruned = logging::prune_old_logs(&log_dir, settings.settings().log_retention_days, chrono::Local::now());
    if let Err(e) = logging::init_file_logging(&log_dir) {
        eprintln!("{}", e);
    }
    if pruned > 0 {
        tlog!("[console] Removed {} old log files", pruned);
    }
    tlog!("[console] Settings: {}", settings_path.display());

    let result = match cli.command {
        Command::Ports => print_ports(&settings),
        Command::Monitor(args) => monitor(settings, args).await,
    };

    logging::stop_file_logging();
    result
}

fn print_ports(settings: &SettingsStore) -> Result<(), String> {
    let ports = list_ports(&SystemPorts);
    let entries = port_listing(&ports, settings.settings().remembered_port());
    let mut out = Renderer::new();
    out.ports(&entries).map_err(|e| e.to_string())
}

async fn monitor(settings: SettingsStore, args: MonitorArgs) -> Result<(), String> {
    let connect_now = args.port.is_some() || settings.settings().remembered_port().is_some();

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let ports = tokio::task::spawn_blocking(|| list_ports(&SystemPorts))
        .await
        .unwrap_or_default();
    let mut controller =
        SessionController::new(Arc::new(SystemOpener), Arc::new(SystemPorts), ports, settings, ui_tx);
    controller.set_live_filter(&args.include, &args.exclude);
    if let Some(dir) = args.export_dir {
        controller.set_export_dir(dir);
    }
    controller.start_watcher();

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    if let Some(keyword) = args.filter {
        let _ = commands_tx.send(SessionCommand::SetKeyword(keyword));
    }
    if connect_now {
        let _ = commands_tx.send(SessionCommand::Connect {
            port: args.port,
            baud_rate: args.baud,
        });
    }

    let renderer = tokio::spawn(async move {
        let mut out = Renderer::new();
        while let Some(event) = ui_rx.recv().await {
            if let Err(e) = out.render(&event) {
                tlog!("[console] Failed to write to terminal: {}", e);
                break;
            }
        }
    });

    // Stdin feeds commands until EOF or :quit
    let input_tx = commands_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if input_tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{}", message),
                },
                Ok(None) => {
                    let _ = input_tx.send(SessionCommand::Quit);
                    break;
                }
                Err(e) => {
                    tlog!("[console] stdin closed: {}", e);
                    let _ = input_tx.send(SessionCommand::Quit);
                    break;
                }
            }
        }
    });
    drop(commands_tx);

    controller.run(commands_rx).await;
    // The controller dropped its sender, so the renderer drains and exits
    let _ = renderer.await;
    Ok(())
}

// ============================================================================
// Rendering
// ============================================================================

struct Renderer {
    stdout: std::io::Stdout,
}

impl Renderer {
    fn new() -> Self {
        Renderer {
            stdout: std::io::stdout(),
        }
    }

    fn render(&mut self, event: &UiEvent) -> std::io::Result<()> {
        match event {
            UiEvent::Line(text) => {
                writeln!(self.stdout, "{}", text)?;
            }
            UiEvent::PortsChanged(entries) => return self.ports(entries),
            UiEvent::Connected { port, baud_rate } => {
                self.styled(Color::Green, true, &format!("Connected to {} at {} baud", port, baud_rate))?;
            }
            UiEvent::Disconnected { port } => {
                self.styled(Color::Yellow, false, &format!("Disconnected from {}", port))?;
            }
            UiEvent::Faulted(message) | UiEvent::Error(message) => {
                self.styled(Color::Red, true, message)?;
            }
            UiEvent::Warning(message) => self.styled(Color::Yellow, true, message)?,
            UiEvent::Notice(message) => self.styled(Color::Cyan, false, message)?,
        }
        self.stdout.flush()
    }

    fn styled(&mut self, color: Color, bold: bool, text: &str) -> std::io::Result<()> {
        self.stdout.queue(SetForegroundColor(color))?;
        if bold {
            self.stdout.queue(SetAttribute(Attribute::Bold))?;
        }
        self.stdout
            .queue(style::Print(text))?
            .queue(SetAttribute(Attribute::Reset))?
            .queue(ResetColor)?
            .queue(style::Print("\n"))?;
        Ok(())
    }

    fn ports(&mut self, entries: &[PortEntry]) -> std::io::Result<()> {
        if entries.is_empty() {
            self.styled(Color::DarkGrey, false, "No serial ports found")?;
            return self.stdout.flush();
        }

        self.styled(Color::White, true, "Serial ports:")?;
        for entry in entries {
            let color = if entry.present { Color::Green } else { Color::DarkGrey };
            self.stdout
                .queue(style::Print("  "))?
                .queue(SetForegroundColor(color))?
                .queue(style::Print(format!("{:<24}", entry.port.id)))?
                .queue(ResetColor)?
                .queue(style::Print(format!(" {}\n", entry.port.label)))?;
        }
        self.stdout.flush()
    }
}
