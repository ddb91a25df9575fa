use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, DeviceAddr};

/// TCP transport to a device's GUI port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpConnector {
    /// Default bound on a single connection attempt.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a connector with the given per-attempt timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            nodelay: true,
        }
    }

    /// Toggle `TCP_NODELAY` on connected streams (enabled by default).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Per-attempt connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: &DeviceAddr) -> Result<TcpStream> {
        let resolved: Vec<_> = tokio::net::lookup_host((addr.host.as_str(), addr.port))
            .await
            .map_err(|source| TransportError::Resolve {
                host: addr.host.clone(),
                source,
            })?
            .collect();

        if resolved.is_empty() {
            return Err(TransportError::NoAddress {
                host: addr.host.clone(),
            });
        }

        let mut last_err = None;
        for socket_addr in resolved {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(socket_addr)).await
            {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(self.nodelay)?;
                    debug!(%socket_addr, "connected to device");
                    return Ok(stream);
                }
                Ok(Err(source)) => {
                    last_err = Some(TransportError::Connect {
                        addr: socket_addr.to_string(),
                        source,
                    });
                }
                Err(_elapsed) => {
                    last_err = Some(TransportError::Timeout {
                        addr: socket_addr.to_string(),
                        after: self.connect_timeout,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(TransportError::NoAddress {
            host: addr.host.clone(),
        }))
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
