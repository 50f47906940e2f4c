//! E2E test suite for tripwire
//!
//! Runs the whole pipeline against a real TCP sensor bridge on loopback and a
//! temporary evidence directory (no serial port, no camera hardware):
//!
//! - TCP bridge → SensorStream → CaptureTrigger → capture worker → EvidenceStore
//! - SessionHandle → expand / dispose → filesystem
//!
//! Run: `cargo test -p tripwire --test e2e`

use std::fs;
use std::io::{Cursor, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tripwire::capture::{EncodedFrame, FrameFormat};
use tripwire::{
    CameraConfig, CameraDevice, CaptureError, CommandCamera, ConnectionStatus, DisposeError,
    EvidenceId, EvidenceStore, ExpandError, ReviewSession, SessionConfig, SessionEvent,
    SessionHandle, TriggerConfig,
};

const WAIT: Duration = Duration::from_secs(10);

// ── Shared helpers ───────────────────────────────────────────────────

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Camera that hands out the same small PNG every time
struct PngCamera;

impl CameraDevice for PngCamera {
    fn describe(&self) -> String {
        "png-camera".to_string()
    }

    fn grab_frame(&mut self) -> Result<EncodedFrame, CaptureError> {
        Ok(EncodedFrame {
            data: Bytes::from(png_bytes()),
            format: FrameFormat::Png,
        })
    }
}

fn test_config(reconnect: Duration) -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(10),
        reconnect_interval: reconnect,
        trigger: TriggerConfig::undebounced(20.0),
        capture_backlog: 4,
    }
}

fn tcp_transport(listener: &TcpListener) -> Arc<dyn tripwire::SensorTransport> {
    let addr = listener.local_addr().unwrap();
    format!("tcp://{}", addr)
        .parse::<tripwire::SensorEndpoint>()
        .unwrap()
        .transport()
        .unwrap()
}

struct Running {
    handle: SessionHandle,
    events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    fn start(session: ReviewSession) -> Self {
        let handle = session.handle();
        let events = handle.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session.run(cancel.clone()));
        Self {
            handle,
            events,
            cancel,
            task,
        }
    }

    async fn wait_for<F>(&mut self, mut matches: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("session ended early"),
                }
            }
        })
        .await
        .expect("timed out waiting for session event")
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

fn image_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

// ── Capture pipeline ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_readings_become_reviewable_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let store = EvidenceStore::open(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let transport = tcp_transport(&listener);

    // Bridge: send the reference readings and hold the line open until told
    let (done_tx, done_rx) = std_mpsc::channel::<()>();
    let bridge = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(b"45.0\n18.5\n3.0\n").unwrap();
        conn.flush().unwrap();
        let _ = done_rx.recv();
    });

    let session = ReviewSession::new(
        test_config(Duration::from_millis(100)),
        store,
        transport,
        Box::new(PngCamera),
    );
    let mut running = Running::start(session);

    running
        .wait_for(|e| matches!(e, SessionEvent::SensorConnected { .. }))
        .await;
    let mut captured = Vec::new();
    for _ in 0..2 {
        if let SessionEvent::EvidenceCaptured { record } = running
            .wait_for(|e| matches!(e, SessionEvent::EvidenceCaptured { .. }))
            .await
        {
            captured.push(record);
        }
    }

    let records = running.handle.records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(image_files(dir.path()).len(), 2);
    assert_eq!(running.handle.connection_status(), ConnectionStatus::Connected);

    // Review: expand one, dispose the other
    let image = running.handle.request_expand(&captured[0].id).await.unwrap();
    assert_eq!((image.width, image.height), (8, 8));

    running.handle.request_dispose(&captured[1].id, false).await.unwrap();
    assert_eq!(image_files(dir.path()).len(), 2);

    running.handle.request_dispose(&captured[1].id, true).await.unwrap();
    assert_eq!(image_files(dir.path()), vec![captured[0].id.to_string()]);
    assert_eq!(running.handle.records().await.unwrap().len(), 1);

    done_tx.send(()).unwrap();
    running.stop().await;
    bridge.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn camera_unavailable_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a1b2.png"), png_bytes()).unwrap();
    let store = EvidenceStore::open(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let transport = tcp_transport(&listener);

    let (done_tx, done_rx) = std_mpsc::channel::<()>();
    let bridge = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(b"5\n").unwrap();
        let _ = done_rx.recv();
    });

    let camera = CommandCamera::new(CameraConfig {
        device: "/dev/video-tripwire-missing".to_string(),
        ..Default::default()
    });
    let session = ReviewSession::new(
        test_config(Duration::from_millis(100)),
        store,
        transport,
        Box::new(camera),
    );
    let mut running = Running::start(session);

    let event = running
        .wait_for(|e| matches!(e, SessionEvent::CaptureFailed { .. }))
        .await;
    let SessionEvent::CaptureFailed { reason } = event else {
        panic!("expected a capture failure, got {:?}", event);
    };
    assert!(reason.contains("unavailable"), "reason: {}", reason);

    let ids: Vec<String> = running
        .handle
        .records()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(ids, vec!["a1b2.png"]);
    assert_eq!(image_files(dir.path()), vec!["a1b2.png"]);

    done_tx.send(()).unwrap();
    running.stop().await;
    bridge.join().unwrap();
}

// ── Connection handling ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_one_interval_after_bridge_hangs_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = EvidenceStore::open(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let transport = tcp_transport(&listener);
    let reconnect = Duration::from_millis(300);

    let (accepted_tx, accepted_rx) = std_mpsc::channel::<Instant>();
    let (done_tx, done_rx) = std_mpsc::channel::<()>();
    let bridge = std::thread::spawn(move || {
        // First connection is closed straight away
        let (first, _) = listener.accept().unwrap();
        accepted_tx.send(Instant::now()).unwrap();
        drop(first);

        let (_second, _) = listener.accept().unwrap();
        accepted_tx.send(Instant::now()).unwrap();
        let _ = done_rx.recv();
    });

    let session =
        ReviewSession::new(test_config(reconnect), store, transport, Box::new(PngCamera));
    let mut running = Running::start(session);

    running
        .wait_for(|e| matches!(e, SessionEvent::SensorConnected { .. }))
        .await;
    running
        .wait_for(|e| matches!(e, SessionEvent::SensorDisconnected { .. }))
        .await;
    running
        .wait_for(|e| matches!(e, SessionEvent::SensorConnected { .. }))
        .await;

    let first = accepted_rx.recv_timeout(WAIT).unwrap();
    let second = accepted_rx.recv_timeout(WAIT).unwrap();
    let gap = second - first;
    // Accept wakeups add a little jitter on either side
    assert!(gap >= reconnect.mul_f64(0.9), "reconnected after {:?}", gap);
    assert!(gap < reconnect * 5, "reconnected after {:?}", gap);

    done_tx.send(()).unwrap();
    running.stop().await;
    bridge.join().unwrap();
}

// ── Startup scan and review ──────────────────────────────────────────

#[tokio::test]
async fn startup_scan_indexes_images_and_flags_corrupt_ones() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a1b2.png"), png_bytes()).unwrap();
    fs::write(dir.path().join("corrupt.jpg"), b"\xFF\xD8\xFF\xE0 not really a jpeg").unwrap();
    fs::write(dir.path().join("notes.txt"), b"not evidence").unwrap();
    let store = EvidenceStore::open(dir.path()).unwrap();

    // Nobody listens here, so the session stays disconnected throughout
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let transport = format!("tcp://127.0.0.1:{}", port)
        .parse::<tripwire::SensorEndpoint>()
        .unwrap()
        .transport()
        .unwrap();

    let session = ReviewSession::new(
        test_config(Duration::from_secs(1)),
        store,
        transport,
        Box::new(PngCamera),
    );
    let running = Running::start(session);

    let mut ids: Vec<String> = running
        .handle
        .records()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a1b2.png", "corrupt.jpg"]);

    assert!(running
        .handle
        .request_expand(&EvidenceId::from("a1b2.png"))
        .await
        .is_ok());
    let err = running
        .handle
        .request_expand(&EvidenceId::from("corrupt.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExpandError::Decode(_)));

    let err = running
        .handle
        .request_dispose(&EvidenceId::from("notes.txt"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, DisposeError::NotFound(_)));
    assert!(dir.path().join("notes.txt").exists());
    assert_eq!(running.handle.connection_status(), ConnectionStatus::Reconnecting);

    running.stop().await;
}
