//! Typed buffer exchange between control surfaces and embedded audio devices.
//!
//! A device exposes one TCP port (5555 by default). Over it, guibridge
//! multiplexes a `data` channel for bulk numeric buffers and a `control`
//! channel for parameter events and session control. Consumers send buffers
//! by index and read the latest buffer received for each index.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device connections (TCP, in-memory pipes)
//! - [`frame`]: Wire framing and the typed payload codec
//! - [`link`]: Sessions, routing, buffer registry and the [`link::Bridge`]
//!   facade (behind the `link` feature)

/// Re-export transport types.
pub mod transport {
    pub use guibridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use guibridge_frame::*;
}

/// Re-export link types (requires `link` feature).
#[cfg(feature = "link")]
pub mod link {
    pub use guibridge_link::*;
}
