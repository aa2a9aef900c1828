//! Low-level binary protocol for the buffer handoff path.
//!
//! This module defines the C-compatible structures exchanged between the
//! hardware composer bridge and the display server over a `SOCK_STREAM`
//! Unix domain socket. Both ends live on the same machine, so every field
//! is in native byte order.
//!
//! # Protocol Overview
//!
//! 1. **Handshake**: bridge sends `Hello` (`Data`), then `AskForResolution`
//!    (`DataNeedsReply`); the server answers with one `HaveResolution`
//!    (`DataReply`).
//! 2. **Frame Handoff**:
//!    - Header: `WireHeader` (transport `Fd`, kind `HaveBuffer`)
//!    - Payload: `BufferPayload`
//!    - Ancillary Data (SCM_RIGHTS): exactly one `RawFd` (the dma-buf)

use bytemuck::{Pod, Zeroable};
use std::mem;

/// Largest payload a receiver will accept before giving up on the stream.
pub const MAX_PAYLOAD_LEN: u32 = 4096;

/// Header preceding every message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireHeader {
    /// Magic number to verify protocol sync ("PLAY")
    pub magic: u32,
    /// Protocol revision, see [`WireHeader::VERSION`]
    pub version: u16,
    /// How the message travels, see [`Transport`]
    pub transport: u16,
    /// What the message says, see [`MessageKind`]
    pub kind: u32,
    /// Number of payload bytes following this header
    pub payload_len: u32,
}

impl WireHeader {
    pub const MAGIC: u32 = 0x504C_4159; // "PLAY" in ASCII
    pub const VERSION: u16 = 1;

    /// Size of the header in bytes
    pub const fn size() -> usize {
        mem::size_of::<Self>()
    }

    /// Parse and sanity-check a header.
    ///
    /// Only framing problems are reported here; an unknown transport or
    /// kind is left for [`Envelope::decode`] so the receiver can still
    /// drain the payload and stay in sync.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::size() {
            return Err(ProtocolError::TruncatedHeader(bytes.len()));
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..Self::size()]);
        if header.magic != Self::MAGIC {
            return Err(ProtocolError::BadMagic(header.magic));
        }
        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }
        if header.payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(header.payload_len));
        }
        Ok(header)
    }
}

/// Delivery class of a message.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain data, no reply expected
    Data = 0,
    /// Data the peer must answer with exactly one `DataReply`
    DataNeedsReply = 1,
    /// Answer to a `DataNeedsReply`
    DataReply = 2,
    /// Data carrying one file descriptor as ancillary data
    Fd = 3,
}

impl TryFrom<u16> for Transport {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::DataNeedsReply),
            2 => Ok(Self::DataReply),
            3 => Ok(Self::Fd),
            other => Err(ProtocolError::UnknownTransport(other)),
        }
    }
}

/// Message kind discriminant.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello = 1,
    AskForResolution = 2,
    HaveResolution = 3,
    HaveBuffer = 4,
}

impl MessageKind {
    /// Payload size fixed by this kind
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Hello | Self::AskForResolution => 0,
            Self::HaveResolution => ResolutionPayload::size(),
            Self::HaveBuffer => BufferPayload::size(),
        }
    }
}

impl TryFrom<u32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Hello),
            2 => Ok(Self::AskForResolution),
            3 => Ok(Self::HaveResolution),
            4 => Ok(Self::HaveBuffer),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

/// Display geometry reported by the server.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ResolutionPayload {
    pub width: u32,
    pub height: u32,
    /// Refresh rate in millihertz (60 Hz = 60000)
    pub refresh_mhz: u32,
}

impl ResolutionPayload {
    pub const fn size() -> usize {
        mem::size_of::<Self>()
    }
}

/// Layout of the buffer attached to a `HaveBuffer` message.
///
/// The modifier leads so the struct has no interior padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferPayload {
    /// DRM format modifier
    pub modifier: u64,
    /// Pixel format code
    pub format: u32,
    /// Bytes per row of the first plane
    pub stride: u32,
    /// Byte offset of the first plane
    pub offset: u32,
    pub reserved: u32,
}

impl BufferPayload {
    pub const fn size() -> usize {
        mem::size_of::<Self>()
    }
}

/// A decoded message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Hello,
    AskForResolution,
    HaveResolution(ResolutionPayload),
    HaveBuffer(BufferPayload),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Hello => MessageKind::Hello,
            Self::AskForResolution => MessageKind::AskForResolution,
            Self::HaveResolution(_) => MessageKind::HaveResolution,
            Self::HaveBuffer(_) => MessageKind::HaveBuffer,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Hello | Self::AskForResolution => &[],
            Self::HaveResolution(res) => bytemuck::bytes_of(res),
            Self::HaveBuffer(buf) => bytemuck::bytes_of(buf),
        }
    }
}

/// A message together with its transport class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub transport: Transport,
    pub message: Message,
}

impl Envelope {
    pub fn new(transport: Transport, message: Message) -> Self {
        Self { transport, message }
    }

    /// Encode header and payload into one contiguous buffer
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.message.payload();
        let header = WireHeader {
            magic: WireHeader::MAGIC,
            version: WireHeader::VERSION,
            transport: self.transport as u16,
            kind: self.message.kind() as u32,
            payload_len: payload.len() as u32,
        };

        let mut buf = Vec::with_capacity(WireHeader::size() + payload.len());
        buf.extend_from_slice(bytemuck::bytes_of(&header));
        buf.extend_from_slice(payload);
        buf
    }

    /// Decode a message whose header has already been parsed.
    pub fn decode(header: &WireHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        let transport = Transport::try_from(header.transport)?;
        let kind = MessageKind::try_from(header.kind)?;

        let expected = kind.payload_len();
        if payload.len() != expected || header.payload_len as usize != expected {
            return Err(ProtocolError::PayloadLength {
                kind,
                expected,
                got: payload.len(),
            });
        }

        let message = match kind {
            MessageKind::Hello => Message::Hello,
            MessageKind::AskForResolution => Message::AskForResolution,
            MessageKind::HaveResolution => {
                Message::HaveResolution(bytemuck::pod_read_unaligned(payload))
            }
            MessageKind::HaveBuffer => Message::HaveBuffer(bytemuck::pod_read_unaligned(payload)),
        };

        Ok(Self { transport, message })
    }
}

/// Wire decoding failures
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated header ({0} bytes)")]
    TruncatedHeader(usize),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),
    #[error("unknown transport type {0}")]
    UnknownTransport(u16),
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("{kind:?} payload must be {expected} bytes, got {got}")]
    PayloadLength {
        kind: MessageKind,
        expected: usize,
        got: usize,
    },
}

impl ProtocolError {
    /// Whether the stream is still framed correctly after this error.
    ///
    /// Header-level failures leave the reader at an unknown position; body
    /// level failures happen after the whole message was consumed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownTransport(_) | Self::UnknownKind(_) | Self::PayloadLength { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes() {
        assert_eq!(WireHeader::size(), 16);
        assert_eq!(ResolutionPayload::size(), 12);
        assert_eq!(BufferPayload::size(), 24);
    }

    #[test]
    fn test_have_buffer_roundtrip() {
        let envelope = Envelope::new(
            Transport::Fd,
            Message::HaveBuffer(BufferPayload {
                modifier: 0x0100_0000_0000_0001,
                format: 0x3432_5241,
                stride: 7680,
                offset: 0,
                reserved: 0,
            }),
        );

        let bytes = envelope.encode();
        assert_eq!(bytes.len(), WireHeader::size() + BufferPayload::size());

        let header = WireHeader::parse(&bytes).unwrap();
        assert_eq!(header.kind, MessageKind::HaveBuffer as u32);
        let decoded = Envelope::decode(&header, &bytes[WireHeader::size()..]).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Envelope::new(Transport::Data, Message::Hello).encode();
        bytes[0] ^= 0xff;
        assert!(matches!(
            WireHeader::parse(&bytes),
            Err(ProtocolError::BadMagic(_))
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = Envelope::new(Transport::Data, Message::Hello).encode();
        assert!(matches!(
            WireHeader::parse(&bytes[..10]),
            Err(ProtocolError::TruncatedHeader(10))
        ));
    }

    #[test]
    fn test_unknown_kind_is_recoverable() {
        let header = WireHeader {
            magic: WireHeader::MAGIC,
            version: WireHeader::VERSION,
            transport: Transport::Data as u16,
            kind: 42,
            payload_len: 8,
        };
        let err = Envelope::decode(&header, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(42)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_payload_length_mismatch() {
        let header = WireHeader {
            magic: WireHeader::MAGIC,
            version: WireHeader::VERSION,
            transport: Transport::DataReply as u16,
            kind: MessageKind::HaveResolution as u32,
            payload_len: 4,
        };
        let err = Envelope::decode(&header, &[0u8; 4]).unwrap_err();
        match err {
            ProtocolError::PayloadLength { expected, got, .. } => {
                assert_eq!(expected, 12);
                assert_eq!(got, 4);
            }
            other => panic!("Wrong error: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let header = WireHeader {
            magic: WireHeader::MAGIC,
            version: WireHeader::VERSION,
            transport: 0,
            kind: 1,
            payload_len: MAX_PAYLOAD_LEN + 1,
        };
        let err = WireHeader::parse(bytemuck::bytes_of(&header)).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
