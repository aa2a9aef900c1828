//! Playdroid IPC Protocol
//!
//! Shared wire types and socket helpers for communication between the
//! hardware composer bridge (`playdroid-hwc`) and the display server
//! (or `playdroid-sink` during bring-up).

pub mod proto;
pub mod socket;

pub use proto::{
    BufferPayload, Envelope, Message, MessageKind, ProtocolError, ResolutionPayload, Transport,
    WireHeader,
};
pub use socket::{recv_message, send_message, Received, RecvError};

/// Well-known path of the display server socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/playdroid_socket";

/// Socket path for IPC communication
///
/// `PLAYDROID_SOCKET` overrides the well-known path, which is handy when
/// running the sink as an unprivileged user.
pub fn socket_path() -> std::path::PathBuf {
    std::env::var_os("PLAYDROID_SOCKET")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_SOCKET_PATH))
}
