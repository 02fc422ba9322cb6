//! The protocol core of a Modbus master (host) service, built on
//! [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! The crate translates high-level register operations into Modbus wire
//! frames, dispatches them over Modbus/TCP or Modbus/RTU, reassembles
//! complete response frames from arbitrarily chunked byte streams, matches
//! responses against outstanding reads, and decodes raw register words into
//! logical data types.
//!
//! # Features
//!
//! * Panic-free frame parsing with automatic RTU resynchronization
//! * Serialized per-session writes and FIFO request/response correlation
//! * Typed register decoding and encoding (`Word`, `Int32`, `Float`,
//!   `String`, CP56-style timestamps, ...)
//! * Configurable wire-traffic decoding in the log output
//!
//! # Supported functions
//!
//! Register-oriented function codes only:
//!
//! * Read Holding Registers (`0x03`)
//! * Read Input Registers (`0x04`)
//! * Write Single Register (`0x06`)
//! * Write Multiple Registers (`0x10`)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use modbus_host::host::Host;
//! use modbus_host::DecodeLevel;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::spawn(DecodeLevel::nothing());
//!
//!     host.open_tcp("127.0.0.1", 502).await?;
//!
//!     let result = host
//!         .read(1, 0x0000, 10, false, Duration::from_millis(2000))
//!         .await?;
//!
//!     for (i, value) in result.values.iter().enumerate() {
//!         println!("register {}: {}", result.address + i as u16, value);
//!     }
//!
//!     host.close_active();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(
    non_snake_case,
    non_camel_case_types,
    non_upper_case_globals,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces
)]

/// public constant values related to the Modbus specification
pub mod constants;
/// controls the decoding of wire traffic in the log output
pub mod decode;
/// error types associated with making requests
pub mod error;
/// Modbus exception codes
pub mod exception;
/// host facade: the public operations of the master service
pub mod host;
/// transport session manager for TCP and serial endpoints
pub mod transport;
/// types used in requests and responses
pub mod types;
/// logical data types layered on top of raw register words
pub mod value;

// internal modules
mod common;

pub use crate::common::function::FunctionCode;
pub use crate::decode::{AppDecodeLevel, DecodeLevel, FrameDecodeLevel, PhysDecodeLevel};
pub use crate::error::RequestError;
pub use crate::exception::ExceptionCode;
pub use crate::types::UnitId;
