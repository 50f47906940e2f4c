//! Tripwire console reviewer
//!
//! Watches the proximity sensor, captures evidence when something comes
//! close, and lets a reviewer list, expand and dispose of evidence from the
//! terminal. Logs go to stderr so they do not interleave with the console.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: sensor on /dev/ttyACM0, camera /dev/video0, ./detected_images
//! tripwire-cli
//!
//! # Sensor behind a ser2net bridge, stricter trigger
//! TRIPWIRE_SENSOR=tcp://10.0.0.5:4000 TRIPWIRE_THRESHOLD=12 tripwire-cli
//!
//! # No camera hardware (requires --features test-source)
//! tripwire-cli --test-source
//! ```

mod console;

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use tripwire::{
    CameraDevice, CommandCamera, EvidenceStore, ReviewSession, SessionConfig, TripwireConfig,
};

use console::Console;

fn camera(config: &TripwireConfig, test_source: bool) -> Result<Box<dyn CameraDevice>> {
    if test_source {
        #[cfg(feature = "test-source")]
        {
            info!("Using synthetic camera");
            return Ok(Box::new(tripwire::SyntheticCamera::new(
                tripwire::SyntheticCameraConfig::default(),
            )));
        }
        #[cfg(not(feature = "test-source"))]
        anyhow::bail!(
            "--test-source requires the test-source feature. Rebuild with --features test-source"
        );
    }
    Ok(Box::new(CommandCamera::new(config.camera.clone())))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tripwire=info".parse()?)
                .add_directive("tripwire_cli=info".parse()?),
        )
        .init();

    let test_source = std::env::args().any(|arg| arg == "--test-source");
    let config = TripwireConfig::from_env();

    info!("Tripwire starting");
    info!("  Evidence dir: {:?}", config.evidence_dir);
    info!("  Sensor: {}", config.sensor.endpoint);
    info!(
        "  Trigger: <= {} (cooldown {:?}, {} in a row)",
        config.trigger.threshold, config.trigger.cooldown, config.trigger.consecutive
    );
    info!("  Camera: {} via {}", config.camera.device, config.camera.program);

    // Fatal: without an evidence directory there is nothing to do
    let store = EvidenceStore::open(&config.evidence_dir)?;
    let transport = config.sensor.endpoint.transport()?;
    let camera = camera(&config, test_source)?;

    let session = ReviewSession::new(SessionConfig::from(&config), store, transport, camera);
    let handle = session.handle();

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(session.run(cancel.clone()));
    tracker.spawn(console::print_events(handle.subscribe(), cancel.clone()));
    tracker.close();

    let reviewer = Console::new(handle, console::spawn_stdin_reader());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = reviewer.run(cancel.clone()) => {
            if let Err(e) = result {
                warn!("Console stopped: {:#}", e);
            }
        }
    }

    cancel.cancel();
    // Allow an in-flight capture to finish writing
    if tokio::time::timeout(Duration::from_secs(15), tracker.wait()).await.is_err() {
        warn!("Shutdown timed out, some tasks may not have finished");
    } else {
        info!("Shut down cleanly");
    }
    Ok(())
}
