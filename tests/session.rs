//! End-to-end tests: a real `DisplaySession` against a fake display server

mod common;

use std::fs::File;
use std::os::fd::OwnedFd;
use std::os::unix::fs::MetadataExt;

use common::FakeServer;
use playdroid_hwc::buffer::{CrosHandle, CrosPlane, GbmHandle};
use playdroid_hwc::hwc::{
    CompositionType, ContentsFlags, DisplayAttribute, DISPLAY_PRIMARY, QUERY_VSYNC_PERIOD,
};
use playdroid_hwc::{
    BridgeConfig, BufferHandle, DisplayContents, DisplaySession, HandshakeError, HwComposer,
    Layer, SessionError, DEFAULT_VSYNC_PERIOD_NS,
};
use playdroid_ipc::{BufferPayload, Envelope, Message, MessageKind, Transport};

fn config(server: &FakeServer, gralloc: &str) -> BridgeConfig {
    BridgeConfig {
        socket_path: server.path().to_path_buf(),
        gralloc: gralloc.to_string(),
        lcd_density: 213,
    }
}

fn memfile() -> File {
    File::open("/dev/null").unwrap()
}

fn frame(target: Layer) -> [Option<DisplayContents>; 1] {
    let mut client = Layer::new(CompositionType::Framebuffer);
    client.acquire_fence = Some(memfile().into());
    [Some(DisplayContents {
        flags: ContentsFlags::empty(),
        layers: vec![client, target],
    })]
}

#[test]
fn test_negotiates_1080p60() {
    let server = FakeServer::with_resolution("1080p60", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    let display = session.display();
    assert_eq!((display.width, display.height), (1920, 1080));
    assert_eq!(display.vsync_period_ns, 16_666_667);
    assert_eq!(session.query(QUERY_VSYNC_PERIOD), Ok(16_666_667));

    let attributes = [
        DisplayAttribute::Width as u32,
        DisplayAttribute::Height as u32,
        DisplayAttribute::VsyncPeriod as u32,
        DisplayAttribute::DpiX as u32,
    ];
    let mut values = [0; 4];
    session
        .display_attributes(DISPLAY_PRIMARY, 0, &attributes, &mut values)
        .unwrap();
    assert_eq!(values, [1920, 1080, 16_666_667, 213_000]);

    session.close();
    assert!(server.finish().is_empty());
}

#[test]
fn test_out_of_range_refresh_keeps_60hz() {
    let server = FakeServer::with_resolution("coarse-refresh", 1280, 720, 500);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    assert_eq!(session.display().vsync_period_ns, DEFAULT_VSYNC_PERIOD_NS);
    assert_eq!(session.query(QUERY_VSYNC_PERIOD), Ok(16_666_667));

    session.close();
    server.finish();
}

#[test]
fn test_wrong_reply_kind_fails_open() {
    let server = FakeServer::start(
        "wrong-kind",
        Envelope::new(Transport::DataReply, Message::AskForResolution),
    );

    let err = DisplaySession::open(&config(&server, "gbm")).unwrap_err();
    assert!(matches!(
        err,
        SessionError::HandshakeFailed(HandshakeError::UnexpectedReply {
            kind: MessageKind::AskForResolution,
            ..
        })
    ));
    server.finish();
}

#[test]
fn test_zero_width_fails_open() {
    let server = FakeServer::with_resolution("zero-width", 0, 1080, 60_000);
    let err = DisplaySession::open(&config(&server, "gbm")).unwrap_err();
    assert!(matches!(err, SessionError::InvalidResolution { width: 0, .. }));
    server.finish();
}

#[test]
fn test_no_server() {
    let path = std::env::temp_dir().join(format!(
        "playdroid-hwc-{}-nobody-home.sock",
        std::process::id()
    ));
    let config = BridgeConfig {
        socket_path: path,
        ..BridgeConfig::default()
    };
    assert!(matches!(
        DisplaySession::open(&config),
        Err(SessionError::ChannelUnavailable { .. })
    ));
}

#[test]
fn test_single_fd_buffer_handoff() {
    let server = FakeServer::with_resolution("gbm-handoff", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    let buffer = memfile();
    let expected = buffer.metadata().unwrap();
    let mut target = Layer::new(CompositionType::FramebufferTarget);
    target.handle = Some(BufferHandle::Gbm(GbmHandle {
        prime_fd: OwnedFd::from(buffer),
        width: 1920,
        height: 1080,
        format: 0x3432_4258,
        modifier: 0x0100_0000_0000_0001,
        stride: 7680,
    }));
    let mut displays = frame(target);

    session.set(&mut displays).unwrap();
    let stats = session.stats();
    assert_eq!(stats.handed_off, 1);
    assert_eq!(stats.skipped, 0);

    // The host's handle still owns its own descriptor.
    let contents = displays[0].take().unwrap();
    assert!(contents.layers[0].acquire_fence.is_none());
    let Some(BufferHandle::Gbm(gbm)) = contents.layers.into_iter().nth(1).unwrap().handle else {
        panic!("target handle changed");
    };
    File::from(gbm.prime_fd).metadata().unwrap();

    session.close();
    let frames = server.finish();
    assert_eq!(frames.len(), 1);

    let received = frames.into_iter().next().unwrap();
    assert_eq!(
        received.envelope,
        Envelope::new(
            Transport::Fd,
            Message::HaveBuffer(BufferPayload {
                modifier: 0x0100_0000_0000_0001,
                format: 0x3432_4258,
                stride: 7680,
                offset: 0,
                reserved: 0,
            })
        )
    );
    assert_eq!(received.fds.len(), 1);
    let sent = File::from(received.fds.into_iter().next().unwrap())
        .metadata()
        .unwrap();
    assert_eq!((sent.dev(), sent.ino()), (expected.dev(), expected.ino()));
}

#[test]
fn test_multi_plane_buffer_handoff() {
    let server = FakeServer::with_resolution("cros-handoff", 1024, 768, 60_000);
    let session = DisplaySession::open(&config(&server, "minigbm_arcvm")).unwrap();

    let mut target = Layer::new(CompositionType::FramebufferTarget);
    target.handle = Some(BufferHandle::Cros(CrosHandle {
        planes: vec![
            CrosPlane {
                fd: memfile().into(),
                stride: 4096,
                offset: 128,
            },
            CrosPlane {
                fd: memfile().into(),
                stride: 2048,
                offset: 4096 * 768,
            },
        ],
        width: 1024,
        height: 768,
        format: 0x3231_564E,
        format_modifier: 3,
    }));

    session.set(&mut frame(target)).unwrap();
    session.close();

    let frames = server.finish();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0].envelope.message,
        Message::HaveBuffer(BufferPayload {
            modifier: 3,
            format: 0x3231_564E,
            stride: 4096,
            offset: 128,
            reserved: 0,
        })
    );
    assert_eq!(frames[0].fds.len(), 1);
}

#[test]
fn test_target_without_handle_sends_nothing() {
    let server = FakeServer::with_resolution("no-handle", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    let mut displays = frame(Layer::new(CompositionType::FramebufferTarget));
    assert!(session.set(&mut displays).is_ok());
    assert_eq!(session.stats().handed_off, 0);
    assert_eq!(session.stats().skipped, 1);

    session.close();
    assert!(server.finish().is_empty());
}

#[test]
fn test_mismatched_handle_is_skipped() {
    let server = FakeServer::with_resolution("mismatch", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "minigbm")).unwrap();

    let mut target = Layer::new(CompositionType::FramebufferTarget);
    target.handle = Some(BufferHandle::Gbm(GbmHandle {
        prime_fd: memfile().into(),
        width: 1920,
        height: 1080,
        format: 1,
        modifier: 0,
        stride: 7680,
    }));
    assert!(session.set(&mut frame(target)).is_ok());

    session.close();
    assert!(server.finish().is_empty());
}

#[test]
fn test_zero_capacity_configs() {
    let server = FakeServer::with_resolution("configs", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    let mut configs: [u32; 0] = [];
    assert_eq!(session.display_configs(DISPLAY_PRIMARY, &mut configs), Ok(0));

    session.close();
    server.finish();
}

#[test]
fn test_vsync_toggle_across_threads() {
    let server = FakeServer::with_resolution("vsync", 1920, 1080, 60_000);
    let session = DisplaySession::open(&config(&server, "gbm")).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..1_000 {
                session.event_control(DISPLAY_PRIMARY, 0, i % 2).unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..1_000 {
                session.query(QUERY_VSYNC_PERIOD).unwrap();
            }
        });
    });
    // Last write was `999 % 2 == 1`.
    assert!(session.vsync_enabled());

    session.close();
    server.finish();
}
