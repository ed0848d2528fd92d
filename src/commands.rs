// src/commands.rs
//
// Operator commands accepted by the session controller, and the parser for
// the console's `:command` syntax.

use std::path::PathBuf;

use crate::display::ExportScope;
use crate::io::ConnectionConfig;

/// Commands sent from the interactive surface to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open a session. Missing values fall back to the remembered port and default baud.
    Connect {
        port: Option<String>,
        baud_rate: Option<u32>,
    },
    Disconnect,
    Clear,
    /// View keyword: limits which buffered lines are visible
    SetKeyword(String),
    /// Live include list (`;`-separated): lines must match one to be kept
    SetInclude(String),
    /// Live exclude list (`;`-separated): lines matching one are dropped
    SetExclude(String),
    Export {
        scope: ExportScope,
        path: Option<PathBuf>,
    },
    ListPorts,
    Help,
    Quit,
}

pub const HELP_TEXT: &str = "\
Commands:
  :connect [PORT] [BAUD]    open a port (defaults to the remembered port)
  :disconnect               close the current session
  :clear                    clear all received lines
  :filter [TEXT]            show only buffered lines containing TEXT
  :include [a;b]            keep only incoming lines containing a or b
  :exclude [c;d]            drop incoming lines containing c or d
  :export [PATH]            save all received lines
  :export-visible [PATH]    save the lines currently shown
  :ports                    list serial ports
  :help                     show this help
  :quit                     close the session and exit";

/// Parse one line of console input. Blank input yields `Ok(None)`.
pub fn parse_command(input: &str) -> Result<Option<SessionCommand>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let Some(body) = input.strip_prefix(':') else {
        return Err(format!("Unknown input '{}'; type :help for commands", input));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let optional_path = || Some(rest).filter(|r| !r.is_empty()).map(PathBuf::from);

    let command = match name {
        "connect" | "c" => {
            let mut args = rest.split_whitespace();
            let port = args.next().map(str::to_string);
            let baud_rate = match args.next() {
                Some(text) => Some(ConnectionConfig::parse_baud(text).map_err(|e| e.to_string())?),
                None => None,
            };
            if args.next().is_some() {
                return Err("usage: :connect [PORT] [BAUD]".to_string());
            }
            SessionCommand::Connect { port, baud_rate }
        }
        "disconnect" | "d" => SessionCommand::Disconnect,
        "clear" => SessionCommand::Clear,
        "filter" | "f" => SessionCommand::SetKeyword(rest.to_string()),
        "include" => SessionCommand::SetInclude(rest.to_string()),
        "exclude" => SessionCommand::SetExclude(rest.to_string()),
        "export" | "save" => SessionCommand::Export {
            scope: ExportScope::All,
            path: optional_path(),
        },
        "export-visible" => SessionCommand::Export {
            scope: ExportScope::Visible,
            path: optional_path(),
        },
        "ports" => SessionCommand::ListPorts,
        "help" | "h" | "?" => SessionCommand::Help,
        "quit" | "q" | "exit" => SessionCommand::Quit,
        other => return Err(format!("Unknown command ':{}'; type :help for commands", other)),
    };

    Ok(Some(command))
}
