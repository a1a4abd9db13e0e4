// This is part of luxtronik.rs.
// See README.md for details.

//! # luxtronik.rs
//!
//! A Rust library for communicating with Luxtronik heat pump controllers.
//!
//!
//! ## Features
//!
//! - Discovers controllers on the local network via UDP broadcast
//! - Reads and writes parameters over the binary TCP service
//! - Subscribes to live value updates over the `Lux_WS` WebSocket service
//! - Decodes the controller's on-device binary log files, including sensor
//!   calibration
//! - Persists decoded telemetry as mergeable JSON time-series files
//!
//!
//! ## Examples
//!
//! ### Read all controllers on the local network into a repository file.
//!
//! ```rust,no_run
//! use luxtronik::{repository, DeviceDiscovery, ProtocolSpec};
//!
//! fn main() -> luxtronik::Result<()> {
//!     // Field registries are versioned artifacts matching the device
//!     // firmware; an empty spec still yields the raw channel indices.
//!     let spec = ProtocolSpec::default();
//!
//!     let discovery = DeviceDiscovery::new();
//!     for address in discovery.discover()? {
//!         println!("reading controller at {}", address);
//!
//!         let data_set = luxtronik::connect_and_read(&address, spec.clone())?;
//!         repository::append("heatpump.json", data_set)?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Convert an on-device binary log file to JSON.
//!
//! ```rust,no_run
//! use luxtronik::repository;
//!
//! fn main() -> luxtronik::Result<()> {
//!     let data_set = repository::open_file("proclog.dta")?;
//!     repository::save_file("proclog.json", &data_set)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(missing_debug_implementations)]

mod error;
pub use error::{Error, Result};

mod value;
pub use value::Value;

mod record;
pub use record::Record;

mod data_set;
pub use data_set::DataSet;

pub mod calibration;
pub use calibration::{CalibrationTable, SensorCurve};

mod field_spec;
pub use field_spec::{FieldCodec, FieldRegistry, FieldSpec};

mod device_discovery;
pub use device_discovery::{DeviceAddress, DeviceDiscovery, DISCOVERY_PORTS};

mod tcp_client;
pub use tcp_client::{connect_and_read, ProtocolSpec, TcpClient};

mod ws_client;
pub use ws_client::{PasswordPrompt, WsSession};

pub mod log_file_decoder;

pub mod repository;
