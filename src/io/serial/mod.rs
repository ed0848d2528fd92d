// src/io/serial/mod.rs
//
// Serial acquisition: line framing and the background reader.

pub mod framer;
pub mod reader;
pub(crate) mod utils;

pub use framer::{Line, LineFramer};
pub use reader::{AcquisitionWorker, ConnectionConfig, DeviceOpener, SerialLink, SystemOpener};
pub use utils::Parity;
