#[macro_use]
pub mod logging;

pub mod commands;
pub mod console;
pub mod display;
pub mod error;
pub mod filter;
pub mod io;
pub mod session;
pub mod settings;

pub use commands::{parse_command, SessionCommand};
pub use display::{DisplaySink, ExportScope};
pub use error::MonitorError;
pub use filter::{matches, KeywordFilter};
pub use io::{
    AcquisitionWorker, ConnectionConfig, Line, LineFramer, PortDescriptor, PortWatcher, SessionEvent,
    WorkerState,
};
pub use session::{SessionController, UiEvent};
pub use settings::{AppSettings, SettingsStore, UnplugPolicy};

use clap::Parser;
use std::time::Duration;

/// Parse the command line and run the console. Returns the process exit code.
pub fn run() -> i32 {
    let cli = console::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return 1;
        }
    };

    let result = runtime.block_on(console::run_cli(cli));
    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(Duration::from_millis(200));

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}
