use std::io::ErrorKind;
use std::time::Duration;

/// Errors that can occur while opening or using a device connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device host name could not be resolved.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no usable socket address.
    #[error("no socket address found for {host}")]
    NoAddress { host: String },

    /// Failed to connect to the resolved address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("connect to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Whether retrying the same address can never succeed.
    ///
    /// Resolution failures and local address errors are configuration
    /// problems; refused or reset connections are transient.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Resolve { .. } | TransportError::NoAddress { .. } => true,
            TransportError::Connect { source, .. } => matches!(
                source.kind(),
                ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
            ),
            TransportError::Shutdown => true,
            TransportError::Timeout { .. } | TransportError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
