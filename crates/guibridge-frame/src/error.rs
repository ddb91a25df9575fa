/// Errors that can occur during frame or payload encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4742 \"GB\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel name is empty, too long, or contains unsupported bytes.
    #[error("invalid channel name {0:?}")]
    InvalidChannelName(String),

    /// The type tag byte does not name a known element type.
    #[error("unknown type tag 0x{0:02x}")]
    UnknownTypeTag(u8),

    /// A textual element type could not be parsed.
    #[error("unknown element type {0:?} (expected float, int or char)")]
    UnknownElementType(String),

    /// The payload length is not a multiple of the element width.
    #[error("payload length {len} is not a multiple of element width {width}")]
    MisalignedPayload { len: usize, width: usize },

    /// A numeric decode was requested for a non-numeric frame.
    #[error("type tag '{0}' does not carry numeric samples")]
    NotNumeric(char),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
