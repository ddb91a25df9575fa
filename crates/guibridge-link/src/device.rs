//! Device end of the protocol.
//!
//! Used by the `guibridge device` mock and by tests. A device greets each
//! client, then exchanges buffers on the same two channels as the bridge.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use guibridge_frame::{
    control_channel, data_channel, Decoded, Frame, FrameCodec, FrameConfig, FrameError, Samples,
    TypeTag, DEFAULT_ADDRESS, DEFAULT_MAX_PAYLOAD,
};
use guibridge_transport::TransportError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::control::{ControlMessage, EVENT_PING, EVENT_PONG};
use crate::error::{LinkError, Result};
use crate::handshake::{handshake_device, HandshakeConfig, HandshakeResult};

/// Settings for the device side.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Base address; channels are `<address>_data` and `<address>_control`.
    pub address: String,
    /// Announced in the greeting.
    pub project_name: Option<String>,
    pub handshake: HandshakeConfig,
    pub max_payload_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            project_name: None,
            handshake: HandshakeConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// TCP listener accepting bridge clients.
#[derive(Debug)]
pub struct DeviceListener {
    listener: TcpListener,
    config: DeviceConfig,
}

impl DeviceListener {
    /// Bind to `addr` (e.g. `0.0.0.0:5555`).
    pub async fn bind(addr: &str, config: DeviceConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::Io)?;
        info!(addr, "device listening");
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr().map_err(TransportError::Io)?)
    }

    /// Accept one client and complete the handshake with it.
    pub async fn accept(&self) -> Result<DeviceConnection<TcpStream>> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        debug!(%peer, "client connected");
        let mut conn = DeviceConnection::accept_stream(stream, &self.config).await?;
        conn.peer = Some(peer);
        Ok(conn)
    }
}

/// One handshaken client connection, seen from the device.
#[derive(Debug)]
pub struct DeviceConnection<S> {
    framed: Framed<S, FrameCodec>,
    data: String,
    control: String,
    handshake: HandshakeResult,
    peer: Option<SocketAddr>,
}

impl<S> DeviceConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Greet the client on `stream` and wait for its reply.
    pub async fn accept_stream(stream: S, config: &DeviceConfig) -> Result<Self> {
        let codec = FrameCodec::with_config(FrameConfig {
            max_payload_size: config.max_payload_size,
        });
        let mut framed = Framed::new(stream, codec);
        let control = control_channel(&config.address);
        let handshake = handshake_device(
            &mut framed,
            &control,
            config.project_name.as_deref(),
            &config.handshake,
        )
        .await?;

        Ok(Self {
            framed,
            data: data_channel(&config.address),
            control,
            handshake,
            peer: None,
        })
    }

    /// Send `samples` as buffer `index` on the data channel.
    pub async fn send_samples(&mut self, index: u32, samples: &Samples) -> Result<()> {
        let frame = Frame::from_samples(self.data.as_str(), index, samples);
        self.send_frame(frame).await
    }

    /// Send `samples` as buffer `index` on the control channel.
    pub async fn send_control_samples(&mut self, index: u32, samples: &Samples) -> Result<()> {
        let frame = Frame::from_samples(self.control.as_str(), index, samples);
        self.send_frame(frame).await
    }

    /// Send a JSON control event.
    pub async fn send_event(&mut self, message: &ControlMessage) -> Result<()> {
        let frame = message.to_frame(&self.control)?;
        self.send_frame(frame).await
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Next frame from the client.
    ///
    /// Pings are answered and pongs swallowed. Malformed frames are skipped.
    /// Returns `Ok(None)` when the client disconnects.
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        loop {
            let frame = match self.framed.next().await {
                None | Some(Err(FrameError::ConnectionClosed)) => return Ok(None),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Decoded::Discarded(discarded))) => {
                    warn!(channel = %discarded.channel, index = discarded.index, error = %discarded.error, "discarding malformed frame");
                    continue;
                }
                Some(Ok(Decoded::Valid(frame))) => frame,
            };

            if frame.channel == self.control && frame.tag == TypeTag::Json {
                match ControlMessage::from_frame(&frame) {
                    Some(Ok(msg)) if msg.is(EVENT_PING) => {
                        self.send_event(&ControlMessage::pong(msg.id)).await?;
                        continue;
                    }
                    Some(Ok(msg)) if msg.is(EVENT_PONG) => continue,
                    _ => {}
                }
            }
            return Ok(Some(frame));
        }
    }

    pub fn handshake(&self) -> &HandshakeResult {
        &self.handshake
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn data_channel(&self) -> &str {
        &self.data
    }

    pub fn control_channel(&self) -> &str {
        &self.control
    }

    /// Close the write side.
    pub async fn close(mut self) -> Result<()> {
        self.framed.close().await.map_err(LinkError::from)
    }
}
