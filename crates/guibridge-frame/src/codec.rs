use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::channel::validate_channel_name;
use crate::error::{FrameError, Result};
use crate::payload::{self, Samples, TypeTag};

/// Fixed header: magic (2) + length (4) + index (4) + tag (1) + name length (1) = 12 bytes.
/// The channel name follows the fixed header.
pub const HEADER_SIZE: usize = 12;

/// Magic bytes: "GB" (0x47 0x42).
pub const MAGIC: [u8; 2] = [0x47, 0x42];

/// Default maximum payload size: 4 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// One addressed, typed buffer on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel name the frame belongs to.
    pub channel: String,
    /// Buffer index within the channel.
    pub index: u32,
    /// Element type of the payload.
    pub tag: TypeTag,
    /// Encoded payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        channel: impl Into<String>,
        index: u32,
        tag: TypeTag,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            index,
            tag,
            payload: payload.into(),
        }
    }

    /// Encode `samples` into a frame for `channel`/`index`.
    pub fn from_samples(channel: impl Into<String>, index: u32, samples: &Samples) -> Self {
        Self::new(channel, index, samples.tag(), payload::encode(samples))
    }

    /// Decode the payload into samples.
    pub fn samples(&self) -> Result<Samples> {
        payload::decode(self.tag, &self.payload)
    }

    /// The total wire size of this frame (header + name + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.channel.len() + self.payload.len()
    }
}

/// A frame read from the stream whose contents could not be accepted.
///
/// The stream stays in sync: the bytes of the frame have been consumed.
#[derive(Debug)]
pub struct Discarded {
    pub channel: String,
    pub index: u32,
    pub error: FrameError,
}

/// Outcome of decoding one complete frame.
#[derive(Debug)]
pub enum Decoded {
    Valid(Frame),
    Discarded(Discarded),
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬──────────┬──────────┬──────────┬───────────┬───────────┐
/// │ Magic (2B) │ Length   │ Index    │ Tag (1B) │ Name len │ Name      │ Payload   │
/// │ 0x47 0x42  │ (4B LE)  │ (4B LE)  │ f/i/c/j  │ (1B)     │ (N bytes) │ (Length)  │
/// │ "GB"       │          │          │          │          │           │           │
/// └────────────┴──────────┴──────────┴──────────┴──────────┴───────────┴───────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    validate_channel_name(&frame.channel)?;
    if frame.payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: u32::MAX as usize,
        });
    }
    let width = frame.tag.width();
    if frame.payload.len() % width != 0 {
        return Err(FrameError::MisalignedPayload {
            len: frame.payload.len(),
            width,
        });
    }

    dst.reserve(frame.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(frame.payload.len() as u32);
    dst.put_u32_le(frame.index);
    dst.put_u8(frame.tag.as_byte());
    dst.put_u8(frame.channel.len() as u8);
    dst.put_slice(frame.channel.as_bytes());
    dst.put_slice(&frame.payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Bad magic and oversized lengths are stream errors; a complete frame with
/// an unusable channel name, tag or payload length is consumed and returned
/// as [`Decoded::Discarded`].
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Decoded>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let index = u32::from_le_bytes([src[6], src[7], src[8], src[9]]);
    let tag_byte = src[10];
    let name_len = src[11] as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + name_len + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let name = src.split_to(name_len);
    let payload = src.split_to(payload_len).freeze();

    let channel = String::from_utf8_lossy(&name).into_owned();
    let discard = |channel: String, error: FrameError| {
        Ok(Some(Decoded::Discarded(Discarded {
            channel,
            index,
            error,
        })))
    };

    if let Err(error) = validate_channel_name(&channel) {
        return discard(channel, error);
    }
    let Some(tag) = TypeTag::from_byte(tag_byte) else {
        return discard(channel, FrameError::UnknownTypeTag(tag_byte));
    };
    if payload_len % tag.width() != 0 {
        return discard(
            channel,
            FrameError::MisalignedPayload {
                len: payload_len,
                width: tag.width(),
            },
        );
    }

    Ok(Some(Decoded::Valid(Frame {
        channel,
        index,
        tag,
        payload,
    })))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 4 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for [`Frame`]s.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>> {
        match self.decode(src)? {
            Some(decoded) => Ok(Some(decoded)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(&frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    use super::*;
    use crate::channel::{CONTROL, DATA};

    fn valid(decoded: Option<Decoded>) -> Frame {
        match decoded {
            Some(Decoded::Valid(frame)) => frame,
            other => panic!("expected valid frame, got {other:?}"),
        }
    }

    fn discarded(decoded: Option<Decoded>) -> Discarded {
        match decoded {
            Some(Decoded::Discarded(d)) => d,
            other => panic!("expected discarded frame, got {other:?}"),
        }
    }

    fn raw_frame(name: &[u8], index: u32, tag: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(payload.len() as u32);
        buf.put_u32_le(index);
        buf.put_u8(tag);
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let frame = Frame::from_samples(DATA, 0, &Samples::Float32(vec![0.6, 0.5, 1.0]));

        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + DATA.len() + 12);

        let decoded = valid(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap());
        assert_eq!(decoded, frame);
        assert_eq!(
            decoded.samples().unwrap(),
            Samples::Float32(vec![0.6, 0.5, 1.0])
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x47, 0x42, 0x00][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::new(DATA, 1, TypeTag::Char, &b"hello"[..]), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF; HEADER_SIZE][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(32 * 1024 * 1024);
        buf.put_u32_le(0);
        buf.put_u8(b'f');
        buf.put_u8(DATA.len() as u8);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn misaligned_payload_is_discarded_and_stream_stays_in_sync() {
        let mut buf = raw_frame(DATA.as_bytes(), 2, b'f', &[1, 2, 3]);
        encode_frame(
            &Frame::from_samples(DATA, 3, &Samples::Int32(vec![7])),
            &mut buf,
        )
        .unwrap();

        let bad = discarded(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap());
        assert_eq!(bad.channel, DATA);
        assert_eq!(bad.index, 2);
        assert!(matches!(
            bad.error,
            FrameError::MisalignedPayload { len: 3, width: 4 }
        ));

        let next = valid(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap());
        assert_eq!(next.index, 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_tag_is_discarded() {
        let mut buf = raw_frame(DATA.as_bytes(), 0, b'z', &[0; 4]);
        let bad = discarded(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap());
        assert!(matches!(bad.error, FrameError::UnknownTypeTag(b'z')));
    }

    #[test]
    fn invalid_channel_name_is_discarded() {
        let mut buf = raw_frame(b"", 0, b'i', &[0; 4]);
        let bad = discarded(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap());
        assert!(matches!(bad.error, FrameError::InvalidChannelName(_)));
    }

    #[test]
    fn encode_rejects_misaligned_and_bad_names() {
        let mut buf = BytesMut::new();
        let err = encode_frame(&Frame::new(DATA, 0, TypeTag::Float32, &b"abc"[..]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::MisalignedPayload { .. }));

        let err = encode_frame(&Frame::new("bad name", 0, TypeTag::Char, &b"a"[..]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidChannelName(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(CONTROL, 0, TypeTag::Json, &b"{}"[..]);
        assert_eq!(frame.wire_size(), HEADER_SIZE + CONTROL.len() + 2);
    }

    #[test]
    fn decode_eof_with_partial_frame_reports_closed() {
        let mut codec = FrameCodec::new();
        let mut buf = raw_frame(DATA.as_bytes(), 0, b'i', &[0; 8]);
        buf.truncate(buf.len() - 3);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn codec_enforces_configured_payload_cap() {
        let mut codec = FrameCodec::with_config(FrameConfig {
            max_payload_size: 4,
        });
        let mut buf = BytesMut::new();
        let err = codec
            .encode(
                Frame::from_samples(DATA, 0, &Samples::Int32(vec![1, 2])),
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);
        let mut writer = Framed::new(left, FrameCodec::new());
        let mut reader = Framed::new(right, FrameCodec::new());

        writer
            .send(Frame::from_samples(DATA, 0, &Samples::Int32(vec![3])))
            .await
            .unwrap();
        writer
            .send(Frame::new(CONTROL, 0, TypeTag::Json, &br#"{"event":"ping"}"#[..]))
            .await
            .unwrap();

        let first = valid(reader.next().await.transpose().unwrap());
        assert_eq!(first.channel, DATA);
        assert_eq!(first.samples().unwrap(), Samples::Int32(vec![3]));

        let second = valid(reader.next().await.transpose().unwrap());
        assert_eq!(second.channel, CONTROL);
        assert_eq!(second.tag, TypeTag::Json);
    }
}
