//! Device connection transports.
//!
//! Provides a unified way to open a byte stream to an audio device:
//! - TCP (the deployed link, `host:5555`)
//! - In-memory duplex pipes (tests and loopback demos)
//!
//! This is the lowest layer of guibridge. Framing and sessions build on top of
//! the [`Connector`] trait provided here.

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryConnector, MemoryListener};
pub use tcp::TcpConnector;
pub use traits::{Connector, DeviceAddr, DEFAULT_HOST, DEFAULT_PORT};
