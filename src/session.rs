//! Display session
//!
//! One session per opened device. Opening connects to the display server
//! and negotiates the display geometry; only a fully negotiated session is
//! ever returned. After that the session dispatches the host's calls:
//! layer classification, frame handoff, geometry queries and the vsync
//! gate. Closing drops the channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::buffer::{normalize, AllocatorBackend};
use crate::channel::{HandoffChannel, NegotiatedDisplay};
use crate::config::BridgeConfig;
use crate::error::SessionError;
use crate::hwc::{
    CompositionType, ContentsFlags, DisplayAttribute, DisplayContents, HwComposer, HwcError,
    HwcProcs, LayerFlags, COLOR_TRANSFORM_IDENTITY, DISPLAY_PRIMARY, EVENT_VSYNC,
    QUERY_VSYNC_PERIOD,
};
use crate::vsync::VsyncGate;

/// The only display config the bridge exposes
const PRIMARY_CONFIG_ID: u32 = 0;

/// Handoff counters, readable while the session runs
#[derive(Debug, Default)]
struct FrameCounters {
    handed_off: AtomicU64,
    skipped: AtomicU64,
    send_failures: AtomicU64,
}

/// Snapshot of a session's handoff counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames whose buffer reached the display server
    pub handed_off: u64,
    /// Frames with nothing describable to hand off
    pub skipped: u64,
    /// Frames whose send failed
    pub send_failures: u64,
}

/// An open, negotiated display
pub struct DisplaySession {
    channel: HandoffChannel,
    display: NegotiatedDisplay,
    backend: AllocatorBackend,
    lcd_density: i32,
    vsync: VsyncGate,
    procs: Mutex<Option<Arc<dyn HwcProcs>>>,
    counters: FrameCounters,
}

impl DisplaySession {
    /// Connect to the display server and negotiate the display.
    ///
    /// Blocks until the server answers the resolution request.
    pub fn open(config: &BridgeConfig) -> Result<Self, SessionError> {
        let channel = HandoffChannel::connect(&config.socket_path).inspect_err(|e| {
            error!("Failed to open display session: {}", e);
        })?;
        Self::with_channel(channel, config)
    }

    /// Negotiate over an already connected channel
    pub fn with_channel(channel: HandoffChannel, config: &BridgeConfig) -> Result<Self, SessionError> {
        let backend = config.backend();
        debug!("Allocator {:?} -> {:?}", config.gralloc, backend);

        let negotiated = channel.negotiate().inspect_err(|e| {
            error!("Display negotiation failed: {}", e);
        })?;

        info!(
            "Display session active: {}x{}, vsync {}ns, allocator {:?}",
            negotiated.width, negotiated.height, negotiated.vsync_period_ns, backend
        );

        Ok(Self {
            channel,
            display: negotiated,
            backend,
            lcd_density: config.lcd_density,
            vsync: VsyncGate::default(),
            procs: Mutex::new(None),
            counters: FrameCounters::default(),
        })
    }

    /// Geometry agreed on with the display server
    pub fn display(&self) -> NegotiatedDisplay {
        self.display
    }

    pub fn backend(&self) -> AllocatorBackend {
        self.backend
    }

    /// Whether the host currently wants vsync events
    pub fn vsync_enabled(&self) -> bool {
        self.vsync.is_enabled()
    }

    /// Callback table registered by the host, if any
    pub fn procs(&self) -> Option<Arc<dyn HwcProcs>> {
        self.procs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            handed_off: self.counters.handed_off.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }

    fn attribute(&self, attribute: DisplayAttribute) -> Result<i32, HwcError> {
        // NegotiatedDisplay guarantees these fit in i32.
        let value = match attribute {
            DisplayAttribute::VsyncPeriod => self.display.vsync_period_ns as i32,
            DisplayAttribute::Width => self.display.width as i32,
            DisplayAttribute::Height => self.display.height as i32,
            DisplayAttribute::DpiX | DisplayAttribute::DpiY => self.lcd_density.saturating_mul(1000),
            DisplayAttribute::ColorTransform => COLOR_TRANSFORM_IDENTITY,
            DisplayAttribute::NoAttribute => {
                return Err(HwcError::UnsupportedQuery(
                    "no attribute requested".to_string(),
                ));
            }
        };
        Ok(value)
    }

    fn skip_frame(&self, reason: &dyn fmt::Display) {
        debug!("Skipping frame handoff: {}", reason);
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }
}

impl HwComposer for DisplaySession {
    fn prepare(&self, displays: &mut [Option<DisplayContents>]) -> Result<(), HwcError> {
        let Some(Some(contents)) = displays.get_mut(DISPLAY_PRIMARY as usize) else {
            return Ok(());
        };
        if !contents.flags.contains(ContentsFlags::GEOMETRY_CHANGED) {
            return Ok(());
        }

        // The target buffer is our only sink, so everything else must be
        // composited by the host first.
        for layer in &mut contents.layers {
            if layer.is_framebuffer_target() || layer.flags.contains(LayerFlags::SKIP_LAYER) {
                continue;
            }
            if layer.composition == CompositionType::Overlay {
                layer.composition = CompositionType::Framebuffer;
            }
        }

        Ok(())
    }

    fn set(&self, displays: &mut [Option<DisplayContents>]) -> Result<(), HwcError> {
        let Some(Some(contents)) = displays.get_mut(DISPLAY_PRIMARY as usize) else {
            return Ok(());
        };

        let mut target = None;
        for (index, layer) in contents.layers.iter_mut().enumerate() {
            if !layer.is_framebuffer_target() || layer.handle.is_none() {
                // Not ours to wait on; release it now.
                drop(layer.acquire_fence.take());
                continue;
            }
            target = Some(index);
        }

        let Some(index) = target else {
            self.skip_frame(&"no framebuffer target buffer");
            return Ok(());
        };

        let descriptor = match normalize(contents.layers[index].handle.as_ref(), self.backend) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.skip_frame(&e);
                return Ok(());
            }
        };

        match self.channel.send_buffer(descriptor) {
            Ok(()) => {
                self.counters.handed_off.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Frame handoff failed: {}", e);
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    fn query(&self, what: i32) -> Result<i32, HwcError> {
        match what {
            QUERY_VSYNC_PERIOD => Ok(self.display.vsync_period_ns as i32),
            other => {
                error!("unsupported query what={}", other);
                Err(HwcError::UnsupportedQuery(format!("query {other}")))
            }
        }
    }

    fn event_control(&self, disp: i32, event: i32, enabled: i32) -> Result<(), HwcError> {
        let enabled = match enabled {
            0 => false,
            1 => true,
            other => {
                return Err(HwcError::InvalidArgument(format!(
                    "enabled must be 0 or 1, got {other}"
                )));
            }
        };
        if event != EVENT_VSYNC {
            return Err(HwcError::InvalidArgument(format!("unknown event {event}")));
        }

        debug!("Vsync events {} (display {})", if enabled { "on" } else { "off" }, disp);
        self.vsync.set_enabled(enabled);
        Ok(())
    }

    fn blank(&self, _display: i32, _blank: bool) -> Result<(), HwcError> {
        Ok(())
    }

    fn dump(&self, _out: &mut String) {}

    fn display_configs(&self, disp: i32, configs: &mut [u32]) -> Result<usize, HwcError> {
        if configs.is_empty() {
            return Ok(0);
        }
        if disp != DISPLAY_PRIMARY {
            return Err(HwcError::UnsupportedQuery(format!("unknown display {disp}")));
        }

        configs[0] = PRIMARY_CONFIG_ID;
        Ok(1)
    }

    fn display_attributes(
        &self,
        disp: i32,
        _config: u32,
        attributes: &[u32],
        values: &mut [i32],
    ) -> Result<(), HwcError> {
        if disp != DISPLAY_PRIMARY {
            error!("unknown display type {}", disp);
            return Err(HwcError::UnsupportedQuery(format!("unknown display {disp}")));
        }

        let requested = attributes
            .iter()
            .take_while(|&&code| code != DisplayAttribute::NoAttribute as u32);
        for (index, &code) in requested.enumerate() {
            let attribute = DisplayAttribute::try_from(code).inspect_err(|_| {
                error!("unknown display attribute {}", code);
            })?;
            let slot = values.get_mut(index).ok_or_else(|| {
                HwcError::InvalidArgument(format!("no room for attribute {index}"))
            })?;
            *slot = self.attribute(attribute)?;
        }

        Ok(())
    }

    fn register_procs(&self, procs: Arc<dyn HwcProcs>) {
        *self.procs.lock().unwrap_or_else(PoisonError::into_inner) = Some(procs);
    }

    fn close(self) {
        info!("Closing display session ({:?})", self.stats());
        self.channel.shutdown();
    }
}

impl fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplaySession")
            .field("display", &self.display)
            .field("backend", &self.backend)
            .field("lcd_density", &self.lcd_density)
            .field("vsync", &self.vsync)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
