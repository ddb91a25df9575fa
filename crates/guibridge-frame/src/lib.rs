//! Length-prefixed, channel-addressed framing for typed numeric buffers.
//!
//! Every frame on the wire carries:
//! - A 2-byte magic number ("GB") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 4-byte little-endian buffer index
//! - A 1-byte element type tag (`f`, `i`, `c`, or `j` for control JSON)
//! - The channel name (length-prefixed, 1 byte)
//!
//! Payloads are encoded by [`payload`] so the decoder never has to guess the
//! element type.

pub mod channel;
pub mod codec;
pub mod error;
pub mod payload;

pub use channel::{
    control_channel, data_channel, validate_channel_name, CONTROL, DATA, DEFAULT_ADDRESS,
    MAX_CHANNEL_NAME_LEN,
};
pub use codec::{
    decode_frame, encode_frame, Decoded, Discarded, Frame, FrameCodec, FrameConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};
pub use payload::{decode, encode, to_int32, to_uint8, ElementType, Samples, TypeTag};
