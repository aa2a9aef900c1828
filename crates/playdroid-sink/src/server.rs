//! Display socket server
//!
//! Accepts bridge connections asynchronously and serves each one on a
//! blocking task, since every message may carry a descriptor that has to
//! be read with `recvmsg`.

use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;

use anyhow::{Context, Result};
use playdroid_ipc::{
    recv_message, send_message, Envelope, Message, ResolutionPayload, Received, RecvError,
    Transport,
};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::args::SinkArgs;
use crate::fps::FpsCounter;

/// Pause after a failed accept
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What one bridge connection delivered
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSummary {
    pub buffers: u64,
    pub resolution_requests: u64,
    pub ignored: u64,
}

/// Listener answering bridges with a fixed resolution
pub struct SinkServer {
    listener: UnixListener,
    resolution: ResolutionPayload,
}

impl SinkServer {
    /// Bind the display socket, replacing a stale one
    pub fn bind(args: &SinkArgs) -> Result<Self> {
        let socket_path = &args.socket_path;

        // Remove existing socket if present
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket {socket_path:?}"))?;
        }

        // Create parent directory if needed
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {parent:?}"))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind {socket_path:?}"))?;
        info!("Display socket listening on {:?}", socket_path);

        Ok(Self {
            listener,
            resolution: ResolutionPayload {
                width: args.width,
                height: args.height,
                refresh_mhz: args.refresh_mhz,
            },
        })
    }

    /// Accept bridges until the task is dropped
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    info!("Bridge connected");
                    let stream = stream.into_std().context("Failed to detach stream")?;
                    stream
                        .set_nonblocking(false)
                        .context("set_nonblocking(false)")?;

                    let resolution = self.resolution;
                    tokio::task::spawn_blocking(move || match serve_bridge(&stream, resolution) {
                        Ok(summary) => info!("Bridge disconnected: {:?}", summary),
                        Err(e) => warn!("Bridge connection failed: {:#}", e),
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    // Errors such as EMFILE repeat until something is closed.
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Serve one bridge until it hangs up
pub fn serve_bridge(stream: &StdUnixStream, resolution: ResolutionPayload) -> Result<BridgeSummary> {
    let mut summary = BridgeSummary::default();
    let mut fps = FpsCounter::default();

    loop {
        let Received { envelope, fds } = match recv_message(stream) {
            Ok(received) => received,
            Err(RecvError::Closed) => return Ok(summary),
            Err(RecvError::Protocol(e)) if e.is_recoverable() => {
                debug!("Ignoring message: {}", e);
                summary.ignored += 1;
                continue;
            }
            Err(e) => return Err(e).context("Failed to read from bridge"),
        };

        match (envelope.transport, envelope.message) {
            (_, Message::Hello) => debug!("received HELLO"),
            (Transport::DataNeedsReply, Message::AskForResolution) => {
                summary.resolution_requests += 1;
                let reply = Envelope::new(Transport::DataReply, Message::HaveResolution(resolution));
                send_message(stream, &reply, None).context("Failed to send resolution")?;
                debug!(
                    "Sent resolution {}x{} @ {}mHz",
                    resolution.width, resolution.height, resolution.refresh_mhz
                );
            }
            (Transport::Fd, Message::HaveBuffer(buffer)) => {
                if fds.len() != 1 {
                    warn!(fd_count = fds.len(), "HaveBuffer should carry exactly one fd");
                }
                debug!(
                    "received buffer: format={:#010x} modifier={:#x} stride={} offset={}",
                    buffer.format, buffer.modifier, buffer.stride, buffer.offset
                );
                summary.buffers += 1;
                if let Some(rate) = fps.tick() {
                    info!("Handoff rate: {:.1} fps", rate);
                }
            }
            (transport, message) => {
                debug!("Ignoring {:?} over {:?}", message.kind(), transport);
                summary.ignored += 1;
            }
        }
        // Received descriptors close here.
    }
}
