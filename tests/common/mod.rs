//! In-process stand-in for the display server

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use playdroid_ipc::{
    recv_message, send_message, Envelope, Message, ResolutionPayload, Received, RecvError,
    Transport,
};

/// Accepts one bridge connection, answers the handshake with a canned reply
/// and records every message that follows until the bridge hangs up.
pub struct FakeServer {
    path: PathBuf,
    handle: JoinHandle<Vec<Received>>,
}

impl FakeServer {
    pub fn start(name: &str, reply: Envelope) -> Self {
        let path = std::env::temp_dir().join(format!(
            "playdroid-hwc-{}-{}.sock",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();

            let hello = recv_message(&stream).unwrap();
            assert_eq!(hello.envelope, Envelope::new(Transport::Data, Message::Hello));
            let ask = recv_message(&stream).unwrap();
            assert_eq!(
                ask.envelope,
                Envelope::new(Transport::DataNeedsReply, Message::AskForResolution)
            );
            send_message(&stream, &reply, None).unwrap();

            let mut frames = Vec::new();
            loop {
                match recv_message(&stream) {
                    Ok(received) => frames.push(received),
                    Err(RecvError::Closed) => break,
                    Err(e) => panic!("fake server read failed: {e}"),
                }
            }
            frames
        });

        Self { path, handle }
    }

    /// Server answering with the given geometry
    pub fn with_resolution(name: &str, width: u32, height: u32, refresh_mhz: u32) -> Self {
        Self::start(
            name,
            Envelope::new(
                Transport::DataReply,
                Message::HaveResolution(ResolutionPayload {
                    width,
                    height,
                    refresh_mhz,
                }),
            ),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the bridge to hang up and return what it sent after the
    /// handshake
    pub fn finish(self) -> Vec<Received> {
        let frames = self.handle.join().unwrap();
        let _ = std::fs::remove_file(&self.path);
        frames
    }
}
