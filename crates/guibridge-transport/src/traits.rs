use std::fmt;
use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Default device host when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Fixed protocol port of the device's GUI server.
pub const DEFAULT_PORT: u16 = 5555;

/// Network location of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddr {
    pub host: String,
    pub port: u16,
}

impl DeviceAddr {
    /// Create an address for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for DeviceAddr {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Opens byte streams to a device.
///
/// The session layer calls [`Connector::connect`] once per connection attempt,
/// including every reconnect.
pub trait Connector {
    /// The connected stream type.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Open a new stream to `addr`.
    fn connect(&self, addr: &DeviceAddr) -> impl Future<Output = Result<Self::Stream>>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
