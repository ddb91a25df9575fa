use guibridge_frame::ElementType;

/// Errors that can occur in session, routing and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] guibridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] guibridge_frame::FrameError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Device disconnected.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A buffer index already holds a different element type.
    #[error("buffer {index}: type {got} does not match established type {expected}")]
    TypeMismatch {
        index: u32,
        expected: ElementType,
        got: ElementType,
    },

    /// Buffer index beyond the registry bound.
    #[error("buffer index {index} out of range (max {max})")]
    IndexOutOfRange { index: u32, max: u32 },

    /// Frame addressed to a channel that was never bound.
    #[error("channel {0:?} is not bound")]
    UnboundChannel(String),

    /// The same channel name was bound twice.
    #[error("channel {0:?} is already bound")]
    DuplicateChannel(String),

    /// Configuration rejected before connecting.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every reconnect attempt allowed by the policy failed.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Buffer state is borrowed by a live view.
    #[error("buffers are borrowed by a live view")]
    Busy,

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl LinkError {
    /// Whether retrying the connection cannot succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Transport(err) => err.is_fatal(),
            LinkError::HandshakeFailed(_)
            | LinkError::InvalidConfig(_)
            | LinkError::ReconnectExhausted { .. }
            | LinkError::Closed => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
