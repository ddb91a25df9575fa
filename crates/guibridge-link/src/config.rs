//! Bridge configuration.
//!
//! ```
//! use guibridge_link::BridgeConfig;
//! use std::time::Duration;
//!
//! let config = BridgeConfig {
//!     ping_interval: Some(Duration::from_millis(500)),
//!     ..BridgeConfig::for_host("192.168.7.2")
//! };
//! assert_eq!(config.port, 5555);
//! assert_eq!(config.data_channel(), "gui_data");
//! ```

use std::time::Duration;

use guibridge_frame::{
    control_channel, data_channel, validate_channel_name, DEFAULT_ADDRESS, DEFAULT_MAX_PAYLOAD,
};
use guibridge_transport::{DeviceAddr, DEFAULT_HOST, DEFAULT_PORT};

use crate::error::{LinkError, Result};
use crate::handshake::HandshakeConfig;

/// Bounded exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
    /// Give up after this many consecutive failures (`None` = never).
    pub max_attempts: Option<u32>,
    /// Give up after this many failures before the first successful open
    /// (`None` = keep trying). Once a session has been open, only
    /// `max_attempts` applies.
    pub initial_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: None,
            initial_attempts: Some(5),
        }
    }
}

/// Everything needed to construct a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device host name or IP.
    pub host: String,
    /// Device GUI port.
    pub port: u16,
    /// Base address; channels are `<address>_data` and `<address>_control`.
    pub address: String,
    /// Bound on a single TCP connect attempt.
    pub connect_timeout: Duration,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Handshake negotiation settings.
    pub handshake: HandshakeConfig,
    /// Largest accepted frame payload after the handshake.
    pub max_payload_size: usize,
    /// Outbound frames that may wait for the writer before sends are refused.
    pub send_queue_capacity: usize,
    /// Interval between liveness pings (`None` disables pings).
    pub ping_interval: Option<Duration>,
    /// Treat the link as dropped after this long without inbound traffic.
    /// Only checked while pings are enabled.
    pub liveness_timeout: Option<Duration>,
    /// How long a graceful shutdown waits for queued frames to be written.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(3),
            reconnect: ReconnectPolicy::default(),
            handshake: HandshakeConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            send_queue_capacity: 1024,
            ping_interval: Some(Duration::from_secs(2)),
            liveness_timeout: Some(Duration::from_secs(6)),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl BridgeConfig {
    /// Default configuration pointed at `host`.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Device address for the transport.
    pub fn device_addr(&self) -> DeviceAddr {
        DeviceAddr::new(self.host.clone(), self.port)
    }

    /// Name of the bulk data channel.
    pub fn data_channel(&self) -> String {
        data_channel(&self.address)
    }

    /// Name of the control channel.
    pub fn control_channel(&self) -> String {
        control_channel(&self.address)
    }

    /// Reject values that can never produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LinkError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(LinkError::InvalidConfig("port must be non-zero".to_string()));
        }
        validate_channel_name(&self.data_channel())
            .and_then(|_| validate_channel_name(&self.control_channel()))
            .map_err(|err| LinkError::InvalidConfig(err.to_string()))?;
        if self.send_queue_capacity == 0 {
            return Err(LinkError::InvalidConfig(
                "send queue capacity must be at least 1".to_string(),
            ));
        }
        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            return Err(LinkError::InvalidConfig(format!(
                "reconnect multiplier must be finite and >= 1 (got {})",
                self.reconnect.multiplier
            )));
        }
        if self.ping_interval.is_some_and(|ping| ping.is_zero()) {
            return Err(LinkError::InvalidConfig(
                "ping interval must be non-zero".to_string(),
            ));
        }
        if self.liveness_timeout.is_some_and(|liveness| liveness.is_zero()) {
            return Err(LinkError::InvalidConfig(
                "liveness timeout must be non-zero".to_string(),
            ));
        }
        if let (Some(ping), Some(liveness)) = (self.ping_interval, self.liveness_timeout) {
            if liveness <= ping {
                return Err(LinkError::InvalidConfig(format!(
                    "liveness timeout {liveness:?} must exceed ping interval {ping:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_gui_port() {
        let config = BridgeConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5555);
        assert_eq!(config.data_channel(), "gui_data");
        assert_eq!(config.control_channel(), "gui_control");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_host_and_zero_port() {
        assert!(BridgeConfig::for_host("  ").validate().is_err());
        let config = BridgeConfig {
            port: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_address() {
        let config = BridgeConfig {
            address: "my gui".to_string(),
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn liveness_must_exceed_ping_interval() {
        let config = BridgeConfig {
            ping_interval: Some(Duration::from_secs(2)),
            liveness_timeout: Some(Duration::from_secs(1)),
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_ping_and_liveness() {
        let zero_ping = BridgeConfig {
            ping_interval: Some(Duration::ZERO),
            liveness_timeout: None,
            ..BridgeConfig::default()
        };
        assert!(matches!(zero_ping.validate(), Err(LinkError::InvalidConfig(_))));

        let zero_liveness = BridgeConfig {
            ping_interval: None,
            liveness_timeout: Some(Duration::ZERO),
            ..BridgeConfig::default()
        };
        assert!(matches!(zero_liveness.validate(), Err(LinkError::InvalidConfig(_))));
    }
}
