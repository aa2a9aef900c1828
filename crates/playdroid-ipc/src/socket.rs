//! Blocking message I/O over a connected Unix stream socket
//!
//! A message is written with a single `sendmsg` so that an attached file
//! descriptor travels with the first byte of its header. The reader
//! collects every SCM_RIGHTS descriptor it sees while reading one message.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr};
use tracing::{debug, warn};

use crate::proto::{Envelope, ProtocolError, WireHeader};

/// Descriptors accepted per message; anything beyond is closed by the kernel.
const MAX_FDS_PER_MESSAGE: usize = 4;

/// A message read from the socket along with any descriptors it carried
#[derive(Debug)]
pub struct Received {
    pub envelope: Envelope,
    pub fds: Vec<OwnedFd>,
}

/// Failure to read one message
#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error("connection closed by peer")]
    Closed,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Send one message, optionally attaching `fd` as SCM_RIGHTS.
///
/// The descriptor is only borrowed; the kernel installs its own copy in
/// the receiver, so the caller stays responsible for closing `fd`.
pub fn send_message(
    stream: &UnixStream,
    envelope: &Envelope,
    fd: Option<BorrowedFd<'_>>,
) -> io::Result<()> {
    let buf = envelope.encode();
    let raw_fds: Vec<RawFd> = fd.iter().map(|fd| fd.as_raw_fd()).collect();
    let socket = stream.as_raw_fd();

    let mut offset = 0;
    let mut first = true;
    while offset < buf.len() {
        let iov = [IoSlice::new(&buf[offset..])];
        let rights = [ControlMessage::ScmRights(&raw_fds)];
        let cmsgs: &[ControlMessage<'_>] = if first && !raw_fds.is_empty() {
            &rights
        } else {
            &[]
        };

        match sendmsg::<()>(socket, &iov, cmsgs, MsgFlags::MSG_NOSIGNAL, None) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                if first && n < buf.len() {
                    debug!("sendmsg partial write: sent={} total={}", n, buf.len());
                }
                offset += n;
                first = false;
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(io::Error::from(err)),
        }
    }

    Ok(())
}

/// Read exactly one message.
///
/// Unknown transports or kinds still consume the whole message, so a
/// [`RecvError::Protocol`] error for which
/// [`ProtocolError::is_recoverable`] holds leaves the stream usable.
pub fn recv_message(stream: &UnixStream) -> Result<Received, RecvError> {
    let socket = stream.as_raw_fd();
    let mut fds = Vec::new();

    let mut header_bytes = [0u8; WireHeader::size()];
    recv_exact(socket, &mut header_bytes, &mut fds)?;
    let header = WireHeader::parse(&header_bytes)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    recv_exact(socket, &mut payload, &mut fds)?;

    let envelope = Envelope::decode(&header, &payload)?;
    Ok(Received { envelope, fds })
}

fn recv_exact(socket: RawFd, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> Result<(), RecvError> {
    let mut filled = 0;
    while filled < buf.len() {
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_FDS_PER_MESSAGE]);
        let mut iov = [IoSliceMut::new(&mut buf[filled..])];

        let msg = match recvmsg::<UnixAddr>(
            socket,
            &mut iov,
            Some(&mut cmsg_space),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Ok(msg) => msg,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(io::Error::from(err).into()),
        };

        if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
            warn!("ancillary data truncated, some descriptors were dropped");
        }
        for cmsg in msg.cmsgs().map_err(io::Error::from)? {
            match cmsg {
                ControlMessageOwned::ScmRights(raw_fds) => {
                    for raw_fd in raw_fds {
                        // SAFETY: the kernel just installed this descriptor for us
                        // and nothing else refers to it.
                        fds.push(unsafe { OwnedFd::from_raw_fd(raw_fd) });
                    }
                }
                other => debug!("ignoring control message: {:?}", other),
            }
        }

        let bytes = msg.bytes;
        if bytes == 0 {
            return Err(RecvError::Closed);
        }
        filled += bytes;
    }

    Ok(())
}
