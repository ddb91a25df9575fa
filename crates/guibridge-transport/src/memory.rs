use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, DeviceAddr};

const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// In-process transport backed by [`tokio::io::duplex`] pipes.
///
/// Each [`Connector::connect`] call creates a fresh pipe and hands the far end
/// to the paired [`MemoryListener`] together with the requested address.
/// Once the listener is dropped, connects fail with `ConnectionRefused`.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<(DuplexStream, DeviceAddr)>,
    capacity: usize,
}

/// Device end of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<(DuplexStream, DeviceAddr)>,
}

impl MemoryConnector {
    /// Create a connected connector/listener pair.
    pub fn pair() -> (MemoryConnector, MemoryListener) {
        Self::pair_with_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Create a pair whose pipes buffer at most `capacity` bytes per direction.
    pub fn pair_with_capacity(capacity: usize) -> (MemoryConnector, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                incoming: tx,
                capacity,
            },
            MemoryListener { incoming: rx },
        )
    }
}

impl Connector for MemoryConnector {
    type Stream = DuplexStream;

    async fn connect(&self, addr: &DeviceAddr) -> Result<DuplexStream> {
        let (local, remote) = tokio::io::duplex(self.capacity);
        self.incoming
            .send((remote, addr.clone()))
            .map_err(|_| TransportError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })?;
        debug!(%addr, "opened in-memory connection");
        Ok(local)
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl MemoryListener {
    /// Wait for the next connection. Returns `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<(DuplexStream, DeviceAddr)> {
        self.incoming.recv().await
    }

    /// Take a pending connection without waiting.
    pub fn try_accept(&mut self) -> Option<(DuplexStream, DeviceAddr)> {
        self.incoming.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn connect_hands_far_end_to_listener() {
        let (connector, mut listener) = MemoryConnector::pair();

        let mut client = connector
            .connect(&DeviceAddr::new("192.168.7.2", 5555))
            .await
            .unwrap();
        let (mut device, addr) = listener.accept().await.unwrap();
        assert_eq!(addr, DeviceAddr::new("192.168.7.2", 5555));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn dropped_listener_refuses_connections() {
        let (connector, listener) = MemoryConnector::pair();
        drop(listener);

        let err = connector.connect(&DeviceAddr::default()).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn try_accept_is_empty_without_connects() {
        let (_connector, mut listener) = MemoryConnector::pair();
        assert!(listener.try_accept().is_none());
    }
}
