use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use guibridge_frame::{Decoded, FrameCodec, FrameError, TypeTag};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::control::{ControlMessage, EVENT_CONNECTION, EVENT_CONNECTION_REPLY};
use crate::error::{LinkError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_PROJECT_NAME_LEN: usize = 256;

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Project announced by the device, if any.
    pub project_name: Option<String>,
    /// Protocol version of the remote end.
    pub protocol_version: String,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeConfig {
    /// Deadline for the whole exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "guibridge".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// Client side: wait for the device greeting, check it and acknowledge.
///
/// Numeric frames that arrive before the greeting are skipped. A greeting
/// without `protocol`/`version` fields is accepted as-is, since older device
/// firmware only announces its project name.
pub async fn handshake_client<S>(
    framed: &mut Framed<S, FrameCodec>,
    control_channel: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let deadline = Instant::now() + config.timeout;
    let greeting = recv_event(framed, control_channel, EVENT_CONNECTION, deadline, config).await?;

    if let Some(name) = &greeting.project_name {
        if name.len() > MAX_PROJECT_NAME_LEN {
            return Err(LinkError::HandshakeFailed(format!(
                "project name too long: {} (max {})",
                name.len(),
                MAX_PROJECT_NAME_LEN
            )));
        }
    }
    let remote_version = check_remote(&greeting, config)?;

    let reply = ControlMessage::connection_reply(&config.protocol_name, &config.protocol_version);
    framed.send(reply.to_frame(control_channel)?).await?;

    debug!(
        project = greeting.project_name.as_deref().unwrap_or(""),
        version = %remote_version,
        "handshake complete"
    );

    Ok(HandshakeResult {
        project_name: greeting.project_name,
        protocol_version: remote_version,
    })
}

/// Device side: greet the client and wait for its acknowledgement.
pub async fn handshake_device<S>(
    framed: &mut Framed<S, FrameCodec>,
    control_channel: &str,
    project_name: Option<&str>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let greeting = ControlMessage::connection(
        project_name,
        &config.protocol_name,
        &config.protocol_version,
    );
    framed.send(greeting.to_frame(control_channel)?).await?;

    let deadline = Instant::now() + config.timeout;
    let reply = recv_event(
        framed,
        control_channel,
        EVENT_CONNECTION_REPLY,
        deadline,
        config,
    )
    .await?;
    let remote_version = check_remote(&reply, config)?;

    Ok(HandshakeResult {
        project_name: project_name.map(str::to_string),
        protocol_version: remote_version,
    })
}

fn check_remote(msg: &ControlMessage, config: &HandshakeConfig) -> Result<String> {
    if let Some(protocol) = &msg.protocol {
        validate_protocol_name(protocol)?;
        if *protocol != config.protocol_name {
            return Err(LinkError::HandshakeFailed(format!(
                "unknown protocol '{}' (expected '{}')",
                protocol, config.protocol_name
            )));
        }
    }

    match &msg.version {
        Some(version) => {
            validate_version(version)?;
            if !is_version_compatible(&config.protocol_version, version)? {
                return Err(LinkError::HandshakeFailed(format!(
                    "incompatible version '{}' (local '{}')",
                    version, config.protocol_version
                )));
            }
            Ok(version.clone())
        }
        None => Ok(config.protocol_version.clone()),
    }
}

async fn recv_event<S>(
    framed: &mut Framed<S, FrameCodec>,
    control_channel: &str,
    event: &str,
    deadline: Instant,
    config: &HandshakeConfig,
) -> Result<ControlMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::time::timeout_at(deadline, framed.next())
            .await
            .map_err(|_| LinkError::Timeout(config.timeout))?;

        let frame = match next {
            None | Some(Err(FrameError::ConnectionClosed)) => {
                return Err(LinkError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(Decoded::Discarded(discarded))) => {
                debug!(channel = %discarded.channel, error = %discarded.error, "skipping malformed frame during handshake");
                continue;
            }
            Some(Ok(Decoded::Valid(frame))) => frame,
        };

        if frame.channel != control_channel || frame.tag != TypeTag::Json {
            debug!(channel = %frame.channel, index = frame.index, "skipping frame before handshake");
            continue;
        }
        if frame.payload.len() > config.max_handshake_payload {
            return Err(LinkError::HandshakeFailed(format!(
                "handshake payload too large: {} (max {})",
                frame.payload.len(),
                config.max_handshake_payload
            )));
        }

        let msg: ControlMessage = serde_json::from_slice(&frame.payload).map_err(|err| {
            LinkError::HandshakeFailed(format!("invalid control message: {err}"))
        })?;
        if msg.is(event) {
            return Ok(msg);
        }
        debug!(event = %msg.event, expected = event, "ignoring control event during handshake");
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(LinkError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    parse_version(version).map(|_| ())
}

/// Versions are compatible when their major numbers match.
fn is_version_compatible(local: &str, remote: &str) -> Result<bool> {
    let (local_major, _) = parse_version(local)?;
    let (remote_major, _) = parse_version(remote)?;
    Ok(local_major == remote_major)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| LinkError::HandshakeFailed(format!("invalid version '{version}': {why}"));

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}
