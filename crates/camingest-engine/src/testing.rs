//! Scripted sources and helpers for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use camingest_source::{
    Packet, PacketSource, Rational, SourceCloser, SourceError, SourceOpener, SourceResult,
    StreamInfo,
};
use camingest_types::{StreamConfig, StreamKind, Transport};

use crate::catalog::StreamCatalog;
use crate::config::EngineConfig;
use crate::dispatch::{PacketCallback, StreamDescriptor};

/// Short timings so tests finish quickly.
pub(crate) fn test_engine_config() -> EngineConfig {
    EngineConfig {
        max_sessions: 4,
        open_attempts: 2,
        open_retry_delay_ms: 10,
        idle_poll_ms: 1,
        watchdog_ms: 30_000,
        stop_timeout_ms: 2_000,
        shutdown_timeout_ms: 2_000,
    }
}

/// Catalog with one `scripted://` entry per name.
pub(crate) fn test_catalog(streams: &[(&str, Transport)]) -> Arc<StreamCatalog> {
    let configs = streams
        .iter()
        .map(|(name, transport)| StreamConfig::new(*name, format!("scripted://{name}"), *transport));
    Arc::new(StreamCatalog::from_configs(configs).unwrap())
}

pub(crate) fn video_packet(pts: Option<i64>) -> Packet {
    Packet::new(0, Bytes::from_static(&[0, 0, 0, 1, 0x65])).with_timestamps(pts, pts)
}

pub(crate) fn audio_packet(pts: Option<i64>) -> Packet {
    Packet::new(1, Bytes::from_static(&[0xff, 0xf1])).with_timestamps(pts, pts)
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Consumer that records every packet it receives.
#[derive(Default)]
pub(crate) struct Collector {
    packets: Mutex<Vec<(StreamKind, Packet)>>,
}

impl Collector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn callback(self: &Arc<Self>) -> PacketCallback {
        let collector = Arc::clone(self);
        Arc::new(move |packet: &Packet, stream: &StreamDescriptor| -> anyhow::Result<()> {
            collector.packets.lock().push((stream.kind, packet.clone()));
            Ok(())
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    pub(crate) fn kinds(&self) -> Vec<StreamKind> {
        self.packets.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub(crate) fn packets(&self) -> Vec<Packet> {
        self.packets.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}

enum Step {
    Packet(Packet),
    Error(SourceError),
}

/// What a scripted source does once its steps run out.
#[derive(Clone, Copy)]
pub(crate) enum WhenDone {
    /// Block until closed.
    Block,

    /// Keep returning `WouldBlock`.
    Idle,
}

struct ScriptedCloser {
    closed: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedCloser {
    fn new(closes: Arc<AtomicUsize>) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            closed: AtomicBool::new(false),
            wake_tx,
            wake_rx,
            closes,
        }
    }
}

impl SourceCloser for ScriptedCloser {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            let _ = self.wake_tx.try_send(());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Source that replays a fixed script of packets and errors.
pub(crate) struct ScriptedSource {
    streams: Vec<StreamInfo>,
    steps: VecDeque<Step>,
    when_done: WhenDone,
    closer: Arc<ScriptedCloser>,
}

impl ScriptedSource {
    fn with_streams(streams: Vec<StreamInfo>) -> Self {
        Self {
            streams,
            steps: VecDeque::new(),
            when_done: WhenDone::Block,
            closer: Arc::new(ScriptedCloser::new(Arc::new(AtomicUsize::new(0)))),
        }
    }

    fn video_stream() -> StreamInfo {
        StreamInfo::video(0, "h264", Rational::new(1, 90_000), Rational::new(30, 1))
    }

    pub(crate) fn video_only() -> Self {
        Self::with_streams(vec![Self::video_stream()])
    }

    pub(crate) fn with_audio() -> Self {
        Self::with_streams(vec![
            Self::video_stream(),
            StreamInfo::audio(1, "aac", Rational::new(1, 48_000)),
        ])
    }

    pub(crate) fn audio_only() -> Self {
        Self::with_streams(vec![StreamInfo::audio(0, "aac", Rational::new(1, 48_000))])
    }

    pub(crate) fn packets(mut self, packets: impl IntoIterator<Item = Packet>) -> Self {
        self.steps.extend(packets.into_iter().map(Step::Packet));
        self
    }

    pub(crate) fn error(mut self, err: SourceError) -> Self {
        self.steps.push_back(Step::Error(err));
        self
    }

    pub(crate) fn then(mut self, when_done: WhenDone) -> Self {
        self.when_done = when_done;
        self
    }

    fn track_closes(mut self, closes: Arc<AtomicUsize>) -> Self {
        self.closer = Arc::new(ScriptedCloser::new(closes));
        self
    }
}

impl PacketSource for ScriptedSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SourceResult<Packet> {
        if self.closer.is_closed() {
            return Err(SourceError::Closed);
        }
        match self.steps.pop_front() {
            Some(Step::Packet(packet)) => Ok(packet),
            Some(Step::Error(err)) => Err(err),
            None => match self.when_done {
                WhenDone::Block => {
                    let _ = self.closer.wake_rx.recv();
                    Err(SourceError::Closed)
                }
                WhenDone::Idle => {
                    thread::sleep(Duration::from_millis(1));
                    Err(SourceError::WouldBlock)
                }
            },
        }
    }

    fn closer(&self) -> Arc<dyn SourceCloser> {
        Arc::clone(&self.closer) as Arc<dyn SourceCloser>
    }
}

/// What the opener does once its queued outcomes run out.
#[derive(Clone, Copy)]
pub(crate) enum Fallback {
    /// Fail to open.
    Fail,

    /// Open a video source that blocks until closed.
    Blocking,

    /// Open a video source that never delivers data.
    Idle,

    /// Panic inside `open`.
    Panic,
}

enum Outcome {
    Source(ScriptedSource),
    Fail,
}

/// Opener that hands out queued scripted sources.
pub(crate) struct ScriptedOpener {
    outcomes: Mutex<VecDeque<Outcome>>,
    fallback: Fallback,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    pub(crate) fn new() -> Self {
        Self::with_fallback(Fallback::Fail)
    }

    pub(crate) fn with_fallback(fallback: Fallback) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn push(&self, source: ScriptedSource) {
        self.outcomes.lock().push_back(Outcome::Source(source));
    }

    pub(crate) fn push_failure(&self) {
        self.outcomes.lock().push_back(Outcome::Fail);
    }

    /// Open calls so far.
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Sources actually closed so far.
    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SourceOpener for ScriptedOpener {
    fn open(&self, url: &str, _transport: Transport) -> SourceResult<Box<dyn PacketSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let outcome = self.outcomes.lock().pop_front();
        let source = match outcome {
            Some(Outcome::Source(source)) => source,
            Some(Outcome::Fail) => return Err(SourceError::Open(format!("{url}: refused"))),
            None => match self.fallback {
                Fallback::Fail => return Err(SourceError::Open(format!("{url}: unreachable"))),
                Fallback::Blocking => ScriptedSource::video_only(),
                Fallback::Idle => ScriptedSource::video_only().then(WhenDone::Idle),
                Fallback::Panic => panic!("opener bug"),
            },
        };

        Ok(Box::new(source.track_closes(Arc::clone(&self.closes))))
    }
}
