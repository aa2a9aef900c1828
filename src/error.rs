//! Error types for session construction and frame handoff

use std::io;
use std::path::PathBuf;

use playdroid_ipc::{MessageKind, RecvError, Transport};

/// Reasons a display session could not be opened
///
/// All of these are fatal: no session is handed to the host.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("display server unavailable at {path:?}: {source}")]
    ChannelUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),
    #[error("invalid resolution received: {width}x{height} @ {refresh_mhz}mHz")]
    InvalidResolution {
        width: u32,
        height: u32,
        refresh_mhz: u32,
    },
}

/// What went wrong while negotiating with the display server
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("failed to send {kind:?}: {source}")]
    Send {
        kind: MessageKind,
        #[source]
        source: io::Error,
    },
    #[error("failed to receive resolution reply: {0}")]
    Recv(#[source] RecvError),
    #[error("expected resolution reply, got {transport:?} {kind:?}")]
    UnexpectedReply {
        transport: Transport,
        kind: MessageKind,
    },
}

/// A single frame could not be handed off
///
/// Never fatal; the next frame tries again on its own.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("failed to duplicate buffer fd: {0}")]
    Duplicate(#[source] io::Error),
    #[error("failed to send buffer: {0}")]
    Send(#[source] io::Error),
}
