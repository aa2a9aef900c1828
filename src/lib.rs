//! Playdroid Hardware Composer Bridge
//!
//! Receives each frame's composited buffer from the host compositor,
//! describes it in allocator-neutral terms and hands it, together with
//! its dma-buf descriptor, to the Playdroid display server over a Unix
//! socket.
//!
//! A [`DisplaySession`] only exists once the display server has told us
//! the display geometry: [`DisplaySession::open`] connects, negotiates and
//! returns an active session or an error, and [`HwComposer::close`]
//! consumes it.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod hwc;
pub mod session;
pub mod vsync;

pub use buffer::{normalize, AllocatorBackend, BufferDescriptor, BufferHandle, UnsupportedHandle};
pub use channel::{HandoffChannel, NegotiatedDisplay, DEFAULT_VSYNC_PERIOD_NS};
pub use config::BridgeConfig;
pub use error::{HandoffError, HandshakeError, SessionError};
pub use hwc::{DisplayContents, HwComposer, HwcError, HwcProcs, Layer};
pub use session::{DisplaySession, FrameStats};
pub use vsync::VsyncGate;
