//! # hybris-location
//!
//! GNSS location provider daemon. Bridges a hardware positioning engine to
//! location consumers on a local bus, sharing one positioning session among
//! any number of consumers and keeping the engine assisted with network
//! time, almanac (XTRA) data and an AGNSS data connection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hybris_location::BusClient;
//! use serde_json::Value;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut client = BusClient::connect("~/.local/share/hybris-location/provider.sock")?;
//!     client.call("AddReference", Value::Null)?;
//!     let position = client.wait_for_signal("PositionChanged")?;
//!     println!("{}", position.args);
//!     client.call("RemoveReference", Value::Null)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! NDJSON over a UNIX socket. Each connection is one bus peer.
//!
//! **Request:**
//! ```json
//! {"id":"uuid","v":1,"method":"SetOptions","params":{"UpdateInterval":2000}}
//! ```
//!
//! **Response:**
//! ```json
//! {"id":"uuid","ok":true,"result":null,"meta":{"server_ms":0.2,"protocol_v":1}}
//! ```
//!
//! **Signal:**
//! ```json
//! {"signal":"StatusChanged","args":{"status":3}}
//! ```

pub mod agnss;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod location;
pub mod logging;
pub mod network;
pub mod nmea;
pub mod ntp;
pub mod policy;
pub mod protocol;
pub mod provider;
pub mod runtime;
pub mod server;
pub mod service;
pub mod session;
pub mod status;
pub mod timer;
pub mod xtra;

// Re-exports for convenience
pub use client::BusClient;
pub use config::{Config, GpsConf};
pub use engine::{EngineKind, GnssEngine};
pub use error::{ConfigError, EngineError, MethodError};
pub use event::{Event, EventSender};
pub use lifecycle::{cleanup_files, cleanup_socket, daemonize, write_pid_file};
pub use location::Location;
pub use protocol::{ErrorInfo, Request, Response, ResponseMeta, Signal};
pub use provider::{Collaborators, LocationProvider};
pub use runtime::EventLoop;
pub use server::{BusServer, ServerHandle};
pub use service::BusService;
pub use status::Status;

/// Protocol version constant
pub const PROTOCOL_VERSION: u8 = 1;
