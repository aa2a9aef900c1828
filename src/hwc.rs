//! Hardware composer host contract
//!
//! The host compositor drives the bridge through a fixed table of calls.
//! This module models that table as the [`HwComposer`] trait together with
//! the frame contents the host hands over on every `prepare`/`set`.

use std::os::fd::OwnedFd;
use std::sync::Arc;

use bitflags::bitflags;

use crate::buffer::BufferHandle;

// ============================================================================
// Host Codes
// ============================================================================

/// The one logical display this bridge drives
pub const DISPLAY_PRIMARY: i32 = 0;

/// `query` code for the vsync period
pub const QUERY_VSYNC_PERIOD: i32 = 1;

/// `event_control` code for vsync events
pub const EVENT_VSYNC: i32 = 0;

/// Color transform reported for the display
pub const COLOR_TRANSFORM_IDENTITY: i32 = 0;

/// Display attribute codes accepted by `display_attributes`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayAttribute {
    /// Terminates an attribute list
    NoAttribute = 0,
    VsyncPeriod = 1,
    Width = 2,
    Height = 3,
    DpiX = 4,
    DpiY = 5,
    ColorTransform = 6,
}

impl TryFrom<u32> for DisplayAttribute {
    type Error = HwcError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoAttribute),
            1 => Ok(Self::VsyncPeriod),
            2 => Ok(Self::Width),
            3 => Ok(Self::Height),
            4 => Ok(Self::DpiX),
            5 => Ok(Self::DpiY),
            6 => Ok(Self::ColorTransform),
            other => Err(HwcError::UnsupportedQuery(format!(
                "unknown display attribute {other}"
            ))),
        }
    }
}

/// How the host intends to composite a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionType {
    /// Composited by the host into the framebuffer target
    Framebuffer,
    /// Handed to display hardware directly
    Overlay,
    Background,
    /// The host's composited output for the frame
    FramebufferTarget,
    Sideband,
    CursorOverlay,
}

bitflags! {
    /// Per-frame flags on [`DisplayContents`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContentsFlags: u32 {
        /// Layer list or layer geometry changed since the last frame
        const GEOMETRY_CHANGED = 0x0000_0001;
    }
}

bitflags! {
    /// Per-layer flags on [`Layer`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayerFlags: u32 {
        /// The host will handle this layer itself; leave it alone
        const SKIP_LAYER = 0x0000_0001;
    }
}

// ============================================================================
// Frame Contents
// ============================================================================

/// One layer of a frame
#[derive(Debug)]
pub struct Layer {
    pub composition: CompositionType,
    pub flags: LayerFlags,
    /// Buffer the layer shows, if any
    pub handle: Option<BufferHandle>,
    /// Signalled once `handle` holds the layer's content
    pub acquire_fence: Option<OwnedFd>,
}

impl Layer {
    pub fn new(composition: CompositionType) -> Self {
        Self {
            composition,
            flags: LayerFlags::empty(),
            handle: None,
            acquire_fence: None,
        }
    }

    pub fn is_framebuffer_target(&self) -> bool {
        self.composition == CompositionType::FramebufferTarget
    }
}

/// Everything the host wants shown on one display for one frame
#[derive(Debug, Default)]
pub struct DisplayContents {
    pub flags: ContentsFlags,
    pub layers: Vec<Layer>,
}

// ============================================================================
// Host Callbacks
// ============================================================================

/// Callbacks the host registers with `register_procs`
pub trait HwcProcs: Send + Sync {
    /// Ask the host to redraw
    fn invalidate(&self);

    /// Deliver a vsync event
    fn vsync(&self, display: i32, timestamp_ns: i64);

    /// Report a display being connected or disconnected
    fn hotplug(&self, display: i32, connected: bool);
}

// ============================================================================
// Errors
// ============================================================================

/// Call-local failures returned to the host
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HwcError {
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HwcError {
    /// Negative errno as the host's status convention expects
    pub fn status(&self) -> i32 {
        match self {
            Self::UnsupportedQuery(_) | Self::InvalidArgument(_) => -libc::EINVAL,
        }
    }
}

/// Collapse a call result into the host's `0` / negative errno convention
pub fn status<T>(result: &Result<T, HwcError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.status(),
    }
}

// ============================================================================
// Call Table
// ============================================================================

/// The fixed call table a hardware composer must satisfy
///
/// `displays` is indexed by display id; only [`DISPLAY_PRIMARY`] is ever
/// populated for this bridge.
pub trait HwComposer: Send + Sync {
    /// Classify layers before the host composites the frame
    fn prepare(&self, displays: &mut [Option<DisplayContents>]) -> Result<(), HwcError>;

    /// Present the composited frame
    fn set(&self, displays: &mut [Option<DisplayContents>]) -> Result<(), HwcError>;

    /// Query a device-wide value
    fn query(&self, what: i32) -> Result<i32, HwcError>;

    /// Enable or disable delivery of an event kind
    fn event_control(&self, display: i32, event: i32, enabled: i32) -> Result<(), HwcError>;

    /// Blank or unblank a display
    fn blank(&self, display: i32, blank: bool) -> Result<(), HwcError>;

    /// Append diagnostic state to `out`
    fn dump(&self, out: &mut String);

    /// Write the display's config ids into `configs`, returning how many
    /// were written
    fn display_configs(&self, display: i32, configs: &mut [u32]) -> Result<usize, HwcError>;

    /// Resolve each code in `attributes` into the matching slot of `values`
    fn display_attributes(
        &self,
        display: i32,
        config: u32,
        attributes: &[u32],
        values: &mut [i32],
    ) -> Result<(), HwcError>;

    /// Install the host's callback table
    fn register_procs(&self, procs: Arc<dyn HwcProcs>);

    /// Tear the device down
    fn close(self)
    where
        Self: Sized;
}
