//! Device sessions, channel routing and buffer storage for guibridge.
//!
//! [`Bridge`] is the entry point for consumers: it owns one [`Session`] to a
//! device, routes frames between the `data` and `control` channels and keeps
//! the latest value of every buffer in a [`BufferRegistry`].
//!
//! Everything here is single-threaded. A bridge must be created and used
//! inside a [`tokio::task::LocalSet`].

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod control;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod session;

pub use backoff::Backoff;
pub use bridge::{Bridge, BridgeStats, Buffers};
pub use config::{BridgeConfig, ReconnectPolicy};
pub use control::ControlMessage;
pub use device::{DeviceConfig, DeviceConnection, DeviceListener};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{LinkError, Result};
pub use handshake::{handshake_client, handshake_device, HandshakeConfig, HandshakeResult};
pub use registry::{BufferRegistry, BuffersView, WriteOutcome, MAX_BUFFER_INDEX};
pub use router::{ChannelHandle, ChannelRouter, Dispatch, RouterBuilder};
pub use session::{SendStatus, Session, SessionState, SessionStats};

pub use guibridge_frame::{ElementType, Samples};
