//! Buffer handle normalization
//!
//! Gralloc implementations describe a graphics buffer with their own
//! handle layout. [`normalize`] turns whichever layout the configured
//! allocator produced into a [`BufferDescriptor`] the display server
//! understands. No I/O happens here.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Buffer allocator the host was built against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorBackend {
    /// Stock software gralloc
    GenericSoftware,
    /// Vendor gralloc with an unknown handle layout
    GenericHardware,
    /// drm_gralloc / gbm_gralloc: single fd, no plane offset
    GenericBufferManager,
    /// minigbm (cros_gralloc): per-plane fds, strides and offsets
    MultiPlaneAllocator,
}

impl AllocatorBackend {
    /// Map the allocator name from system configuration to a backend
    pub fn from_name(name: &str) -> Self {
        match name {
            "default" => Self::GenericSoftware,
            "gbm" => Self::GenericBufferManager,
            name if name.starts_with("minigbm") => Self::MultiPlaneAllocator,
            _ => Self::GenericHardware,
        }
    }
}

// ============================================================================
// Host Handle Layouts
// ============================================================================

/// Handle produced by gbm_gralloc
#[derive(Debug)]
pub struct GbmHandle {
    pub prime_fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub modifier: u64,
    pub stride: u32,
}

/// One plane of a [`CrosHandle`]
#[derive(Debug)]
pub struct CrosPlane {
    pub fd: OwnedFd,
    pub stride: u32,
    pub offset: u32,
}

/// Handle produced by minigbm's cros_gralloc
#[derive(Debug)]
pub struct CrosHandle {
    pub planes: Vec<CrosPlane>,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub format_modifier: u64,
}

/// Opaque handle from an allocator whose layout we do not know
#[derive(Debug, Default)]
pub struct NativeHandle {
    pub fds: Vec<OwnedFd>,
    pub ints: Vec<i32>,
}

/// A graphics buffer as the host hands it to us
#[derive(Debug)]
pub enum BufferHandle {
    Gbm(GbmHandle),
    Cros(CrosHandle),
    Native(NativeHandle),
}

// ============================================================================
// Normalized Descriptor
// ============================================================================

/// Allocator-neutral description of a single-plane buffer
///
/// The descriptor borrows the host's descriptor; whoever transmits it
/// takes a private duplicate for the duration of the send.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub format: u32,
    pub modifier: u64,
    pub stride: u32,
    pub plane_offset: u32,
    pub memory_fd: BorrowedFd<'a>,
}

/// The buffer cannot be described for the configured allocator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedHandle {
    #[error("no buffer handle")]
    Missing,
    #[error("allocator {0:?} has no known handle layout")]
    Backend(AllocatorBackend),
    #[error("{found} handle does not match allocator {backend:?}")]
    LayoutMismatch {
        backend: AllocatorBackend,
        found: &'static str,
    },
    #[error("handle has no planes")]
    NoPlanes,
}

impl BufferHandle {
    fn layout_name(&self) -> &'static str {
        match self {
            Self::Gbm(_) => "gbm",
            Self::Cros(_) => "cros",
            Self::Native(_) => "native",
        }
    }
}

/// Describe `handle` as laid out by `backend`.
///
/// Only the first plane is described; the composited target the host
/// hands over is always single-plane.
pub fn normalize(
    handle: Option<&BufferHandle>,
    backend: AllocatorBackend,
) -> Result<BufferDescriptor<'_>, UnsupportedHandle> {
    let handle = handle.ok_or(UnsupportedHandle::Missing)?;

    match (backend, handle) {
        (AllocatorBackend::GenericBufferManager, BufferHandle::Gbm(gbm)) => Ok(BufferDescriptor {
            format: gbm.format,
            modifier: gbm.modifier,
            stride: gbm.stride,
            plane_offset: 0,
            memory_fd: gbm.prime_fd.as_fd(),
        }),
        (AllocatorBackend::MultiPlaneAllocator, BufferHandle::Cros(cros)) => {
            let plane = cros.planes.first().ok_or(UnsupportedHandle::NoPlanes)?;
            Ok(BufferDescriptor {
                format: cros.format,
                modifier: cros.format_modifier,
                stride: plane.stride,
                plane_offset: plane.offset,
                memory_fd: plane.fd.as_fd(),
            })
        }
        (AllocatorBackend::GenericBufferManager | AllocatorBackend::MultiPlaneAllocator, other) => {
            Err(UnsupportedHandle::LayoutMismatch {
                backend,
                found: other.layout_name(),
            })
        }
        (AllocatorBackend::GenericSoftware | AllocatorBackend::GenericHardware, _) => {
            Err(UnsupportedHandle::Backend(backend))
        }
    }
}
