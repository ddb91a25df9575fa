//! Channel naming.
//!
//! A device exposes one base address (`gui` by default) split into two
//! channels: `<base>_data` for bulk buffers and `<base>_control` for discrete
//! parameter events and session control messages.

use crate::error::{FrameError, Result};

/// Default base address.
pub const DEFAULT_ADDRESS: &str = "gui";

/// Bulk numeric buffers on the default address.
pub const DATA: &str = "gui_data";

/// Parameter events and session control on the default address.
pub const CONTROL: &str = "gui_control";

/// Suffix appended to the base address for the data channel.
pub const DATA_SUFFIX: &str = "_data";

/// Suffix appended to the base address for the control channel.
pub const CONTROL_SUFFIX: &str = "_control";

/// Longest channel name that fits the 1-byte length field we allow.
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Data channel name for a base address.
pub fn data_channel(base: &str) -> String {
    format!("{base}{DATA_SUFFIX}")
}

/// Control channel name for a base address.
pub fn control_channel(base: &str) -> String {
    format!("{base}{CONTROL_SUFFIX}")
}

/// Check that a channel name can be put on the wire.
///
/// Names are 1-64 bytes of ASCII alphanumerics, `_`, `-`, `.` or `/`.
pub fn validate_channel_name(name: &str) -> Result<()> {
    let valid_len = !name.is_empty() && name.len() <= MAX_CHANNEL_NAME_LEN;
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/'));
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(FrameError::InvalidChannelName(name.to_string()))
    }
}
