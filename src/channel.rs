//! Handoff channel to the display server
//!
//! Owns the Unix socket connection. The handshake runs once, blocking,
//! while the session is being opened; after that the channel only ever
//! writes `HaveBuffer` messages and never waits for an answer.

use std::net::Shutdown;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use playdroid_ipc::{
    recv_message, send_message, BufferPayload, Envelope, Message, MessageKind, ResolutionPayload,
    Transport,
};
use tracing::{debug, info, warn};

use crate::buffer::BufferDescriptor;
use crate::error::{HandoffError, HandshakeError, SessionError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Vsync period used when the server's refresh rate is unusable (60 Hz)
pub const DEFAULT_VSYNC_PERIOD_NS: u32 = 16_666_667;

/// Refresh rates outside this open interval (in mHz) are ignored
const REFRESH_MHZ_RANGE: (u32, u32) = (1_000, 1_000_000);

/// Vsync period for a refresh rate in millihertz, rounded to the nearest ns
pub fn vsync_period_ns(refresh_mhz: u32) -> u32 {
    let (low, high) = REFRESH_MHZ_RANGE;
    if refresh_mhz <= low || refresh_mhz >= high {
        return DEFAULT_VSYNC_PERIOD_NS;
    }

    let mhz = u64::from(refresh_mhz);
    // At most 1e12 / 1001, well inside u32.
    ((NANOS_PER_SEC * 1_000 + mhz / 2) / mhz) as u32
}

/// Display geometry agreed on during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedDisplay {
    pub width: u32,
    pub height: u32,
    pub refresh_mhz: u32,
    pub vsync_period_ns: u32,
}

impl NegotiatedDisplay {
    /// Validate the server's reply and derive the vsync period
    pub fn from_resolution(res: &ResolutionPayload) -> Result<Self, SessionError> {
        // Values are reported back to the host as i32.
        let in_range = |v: u32| v > 0 && i32::try_from(v).is_ok();
        if !in_range(res.width) || !in_range(res.height) || !in_range(res.refresh_mhz) {
            return Err(SessionError::InvalidResolution {
                width: res.width,
                height: res.height,
                refresh_mhz: res.refresh_mhz,
            });
        }

        Ok(Self {
            width: res.width,
            height: res.height,
            refresh_mhz: res.refresh_mhz,
            vsync_period_ns: vsync_period_ns(res.refresh_mhz),
        })
    }
}

/// Connection to the display server
#[derive(Debug)]
pub struct HandoffChannel {
    stream: UnixStream,
}

impl HandoffChannel {
    /// Connect to the display server listening at `path`
    pub fn connect(path: &Path) -> Result<Self, SessionError> {
        info!("Connecting to display server at {:?}", path);

        let stream = UnixStream::connect(path).map_err(|source| {
            SessionError::ChannelUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected socket
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Run the startup handshake and return the display geometry.
    ///
    /// Blocks until the server replies; there is no timeout.
    pub fn negotiate(&self) -> Result<NegotiatedDisplay, SessionError> {
        self.send_control(Transport::Data, Message::Hello)?;
        self.send_control(Transport::DataNeedsReply, Message::AskForResolution)?;

        // A failed receive wins over whatever the reply would have said.
        let reply = recv_message(&self.stream).map_err(HandshakeError::Recv)?;
        if !reply.fds.is_empty() {
            warn!(
                fd_count = reply.fds.len(),
                "resolution reply carried descriptors; closing them"
            );
        }

        let envelope = reply.envelope;
        let res = match (envelope.transport, envelope.message) {
            (Transport::DataReply, Message::HaveResolution(res)) => res,
            (transport, message) => {
                return Err(HandshakeError::UnexpectedReply {
                    transport,
                    kind: message.kind(),
                }
                .into());
            }
        };

        let negotiated = NegotiatedDisplay::from_resolution(&res)?;
        info!(
            "Received resolution: {}x{} @ {}mHz (vsync period {}ns)",
            negotiated.width, negotiated.height, negotiated.refresh_mhz, negotiated.vsync_period_ns
        );
        Ok(negotiated)
    }

    fn send_control(&self, transport: Transport, message: Message) -> Result<(), HandshakeError> {
        let kind: MessageKind = message.kind();
        debug!("Sending {:?} ({:?})", kind, transport);
        send_message(&self.stream, &Envelope::new(transport, message), None)
            .map_err(|source| HandshakeError::Send { kind, source })
    }

    /// Hand one buffer to the display server.
    ///
    /// A private duplicate of the buffer's descriptor is attached to the
    /// message and closed again before returning, whether or not the send
    /// went through. The caller's descriptor is left untouched.
    pub fn send_buffer(&self, buffer: BufferDescriptor<'_>) -> Result<(), HandoffError> {
        let memory = buffer
            .memory_fd
            .try_clone_to_owned()
            .map_err(HandoffError::Duplicate)?;

        let envelope = Envelope::new(
            Transport::Fd,
            Message::HaveBuffer(BufferPayload {
                modifier: buffer.modifier,
                format: buffer.format,
                stride: buffer.stride,
                offset: buffer.plane_offset,
                reserved: 0,
            }),
        );

        send_message(&self.stream, &envelope, Some(memory.as_fd())).map_err(HandoffError::Send)
    }

    /// Close the connection
    pub fn shutdown(self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Socket shutdown failed: {}", e);
        }
    }
}
