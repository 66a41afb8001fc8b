//! camingestd: runs reader sessions for the configured camera streams and
//! logs what they deliver.

mod config;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use camingest_engine::{PacketCallback, ReaderRegistry, StreamCatalog, StreamDescriptor};
use camingest_source::{Packet, SyntheticOpener};
use camingest_types::{IngestEvent, StreamKind};

use crate::config::DaemonConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera stream ingestion daemon")]
struct Args {
    /// JSON configuration file; two synthetic streams are used when omitted.
    #[arg(long, short, env = "CAMINGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until Ctrl-C.
    #[arg(long)]
    run_for: Option<u64>,

    /// Start dedicated sessions instead of shared ones.
    #[arg(long)]
    dedicated: bool,

    /// Seconds between stats reports.
    #[arg(long, default_value_t = 10)]
    report_every: u64,
}

/// Per-stream packet counters fed by the consumer.
#[derive(Default)]
struct Delivered {
    video: AtomicU64,
    audio: AtomicU64,
    bytes: AtomicU64,
}

fn counting_consumer(stream: String, delivered: Arc<Delivered>) -> PacketCallback {
    Arc::new(move |packet: &Packet, descriptor: &StreamDescriptor| -> anyhow::Result<()> {
        let counter = match descriptor.kind {
            StreamKind::Video => &delivered.video,
            StreamKind::Audio => &delivered.audio,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        delivered
            .bytes
            .fetch_add(packet.size() as u64, Ordering::Relaxed);

        if packet.is_keyframe {
            debug!(stream = %stream, pts = ?packet.pts, "Keyframe");
        }
        Ok(())
    })
}

fn log_events(events: Receiver<IngestEvent>, should_stop: Arc<AtomicBool>) {
    while !should_stop.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(IngestEvent::SessionStarted { id, name, dedicated }) => {
                info!(stream = %name, %id, dedicated, "Session started");
            }
            Ok(IngestEvent::StateChanged {
                name,
                previous,
                current,
                ..
            }) => {
                info!(stream = %name, from = previous.name(), to = current.name(), "Session state");
            }
            Ok(IngestEvent::SessionStopped { name, reason, .. }) => {
                info!(stream = %name, reason = %reason.message(), "Session stopped");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Wait up to `timeout`; returns true if an interrupt arrived.
fn wait_for_interrupt(interrupt: &Receiver<()>, timeout: Duration) -> bool {
    match interrupt.recv_timeout(timeout) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(timeout);
            false
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => {
            info!("No configuration file given, using synthetic demo streams");
            DaemonConfig::demo()
        }
    };

    let catalog = Arc::new(
        StreamCatalog::from_configs(config.streams.clone()).context("Invalid stream list")?,
    );
    let (event_tx, event_rx) = camingest_types::event_channel();
    let registry = ReaderRegistry::new(
        config.engine.clone(),
        catalog.clone(),
        Arc::new(SyntheticOpener::new()),
    )
    .with_events(event_tx);

    let should_stop = Arc::new(AtomicBool::new(false));
    let logger = {
        let should_stop = Arc::clone(&should_stop);
        thread::Builder::new()
            .name("event-log".into())
            .spawn(move || log_events(event_rx, should_stop))
            .context("Failed to spawn event logger")?
    };

    info!(
        streams = catalog.len(),
        capacity = registry.capacity(),
        "Starting camingestd"
    );

    let mut delivered = Vec::new();
    for name in catalog.names() {
        let counters = Arc::new(Delivered::default());
        let consumer = counting_consumer(name.clone(), Arc::clone(&counters));
        match registry.start(&name, args.dedicated, Some(consumer)) {
            Ok(handle) => delivered.push((handle, counters)),
            Err(e) => warn!(stream = %name, error = %e, "Failed to start stream reader"),
        }
    }

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to set Ctrl-C handler")?;

    let started = Instant::now();
    let report_every = Duration::from_secs(args.report_every.max(1));
    let run_for = args.run_for.map(Duration::from_secs);

    loop {
        let wait = match run_for {
            Some(limit) => limit.saturating_sub(started.elapsed()).min(report_every),
            None => report_every,
        };
        if wait.is_zero() {
            break;
        }
        if wait_for_interrupt(&interrupt_rx, wait) {
            info!("Shutdown signal received");
            break;
        }

        for info in registry.sessions() {
            info!(
                stream = %info.name,
                id = %info.id,
                state = info.state.name(),
                packets = info.stats.packets_read,
                video = info.stats.video_dispatched,
                audio = info.stats.audio_dispatched,
                repaired = info.stats.timestamps_repaired,
                reconnects = info.stats.reconnects,
                "Session stats"
            );
        }
    }

    registry.shutdown_all();

    for (handle, counters) in &delivered {
        info!(
            stream = %handle.name(),
            video = counters.video.load(Ordering::Relaxed),
            audio = counters.audio.load(Ordering::Relaxed),
            bytes = counters.bytes.load(Ordering::Relaxed),
            final_state = handle.state().name(),
            "Delivered"
        );
    }

    should_stop.store(true, Ordering::SeqCst);
    drop(registry);
    if logger.join().is_err() {
        warn!("Event logger panicked");
    }

    info!("camingestd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_ends_wait_early() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();

        let started = Instant::now();
        assert!(wait_for_interrupt(&rx, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out_without_interrupt() {
        let (_tx, rx) = crossbeam_channel::bounded::<()>(1);
        assert!(!wait_for_interrupt(&rx, Duration::from_millis(20)));
    }
}
