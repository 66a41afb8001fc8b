//! Reader session: one thread driving one packet source.
//!
//! ```text
//!   Connecting ──► Running ──► Reconnecting{n} ──► Running ...
//!       │             │               │
//!       ▼             ▼               ▼
//!              Stopped(Failed | Cancelled)
//! ```
//!
//! The session thread exclusively owns the source. A stopper may only flip
//! `running`, signal the cancellation channel, clear the consumer, and call
//! the source's closer, which turns a blocked read into an error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use camingest_source::{
    Packet, PacketSource, ReadErrorClass, SourceCloser, SourceError, SourceOpener, StreamInfo,
};
use camingest_types::{
    IngestEvent, SessionId, SessionState, SessionStats, StopReason, StreamConfig, StreamKind,
};

use crate::config::EngineConfig;
use crate::dispatch::{dispatch, PacketCallback, StreamDescriptor};
use crate::error::IngestError;
use crate::metrics::SessionMetrics;
use crate::reconnect::ReconnectPolicy;
use crate::timestamp::{TimestampNormalizer, TimestampPolicy};
use crate::IngestResult;

/// State shared between a session thread and its stoppers.
pub(crate) struct SessionShared {
    id: SessionId,
    config: StreamConfig,
    dedicated: bool,
    running: AtomicBool,
    state: RwLock<SessionState>,
    consumer: Mutex<Option<PacketCallback>>,
    closer: Mutex<Option<Arc<dyn SourceCloser>>>,
    packet_lock: Mutex<()>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    worker_thread: OnceLock<ThreadId>,
    metrics: SessionMetrics,
    events: Option<Sender<IngestEvent>>,
}

impl SessionShared {
    pub(crate) fn new(
        id: SessionId,
        config: StreamConfig,
        dedicated: bool,
        consumer: Option<PacketCallback>,
        events: Option<Sender<IngestEvent>>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        Self {
            id,
            config,
            dedicated,
            running: AtomicBool::new(true),
            state: RwLock::new(SessionState::Connecting),
            consumer: Mutex::new(consumer),
            closer: Mutex::new(None),
            packet_lock: Mutex::new(()),
            cancel_tx,
            cancel_rx,
            worker_thread: OnceLock::new(),
            metrics: SessionMetrics::new(),
            events,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub(crate) fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub(crate) fn consumer(&self) -> Option<PacketCallback> {
        self.consumer.lock().clone()
    }

    pub(crate) fn has_consumer(&self) -> bool {
        self.consumer.lock().is_some()
    }

    /// Replace the consumer between packets.
    ///
    /// Waits for an in-flight dispatch to finish unless called from the
    /// session's own thread (i.e. from inside the consumer).
    pub(crate) fn set_consumer(&self, consumer: Option<PacketCallback>) {
        if self.on_worker_thread() {
            *self.consumer.lock() = consumer;
            return;
        }
        let _packet = self.packet_lock.lock();
        *self.consumer.lock() = consumer;
    }

    /// Drop the consumer without waiting for an in-flight dispatch.
    pub(crate) fn clear_consumer(&self) {
        self.consumer.lock().take();
    }

    /// Ask the session to stop and unblock whatever it is waiting on.
    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cancel_tx.try_send(());
        self.close_source();
    }

    /// Force-close the current source, if one is published.
    pub(crate) fn close_source(&self) {
        if let Some(closer) = self.closer.lock().take() {
            debug!(stream = %self.name(), "Closing input source");
            closer.close();
        }
    }

    fn publish_closer(&self, closer: Arc<dyn SourceCloser>) {
        *self.closer.lock() = Some(closer);
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread.get() == Some(&thread::current().id())
    }

    /// Sleep up to `delay`; returns false if a stop was requested.
    fn pause(&self, delay: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.cancel_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => self.is_running(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn transition(&self, next: SessionState) {
        let previous = {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            std::mem::replace(&mut *state, next.clone())
        };

        debug!(
            stream = %self.name(),
            previous = %previous.name(),
            current = %next.name(),
            "State transition"
        );

        self.emit(IngestEvent::StateChanged {
            id: self.id,
            name: self.config.name.clone(),
            previous,
            current: next,
        });
    }

    fn finish(&self, reason: StopReason) {
        self.running.store(false, Ordering::SeqCst);
        self.closer.lock().take();
        self.transition(SessionState::Stopped(reason.clone()));
        self.emit(IngestEvent::SessionStopped {
            id: self.id,
            name: self.config.name.clone(),
            reason,
        });
    }

    pub(crate) fn emit(&self, event: IngestEvent) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(stream = %self.name(), "Event channel full, dropping event"),
            Err(TrySendError::Disconnected(_)) => trace!("Event channel closed"),
        }
    }
}

/// Handle to a registered reader session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id()
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn is_dedicated(&self) -> bool {
        self.shared.is_dedicated()
    }

    /// True until a stop is requested or the session fails.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.metrics().snapshot()
    }

    pub fn has_consumer(&self) -> bool {
        self.shared.has_consumer()
    }

    /// Replace or clear the packet consumer.
    ///
    /// A replacement takes effect between packets; the previous consumer is
    /// not invoked again once this returns.
    pub fn set_consumer(&self, consumer: Option<PacketCallback>) {
        if consumer.is_none() {
            info!(stream = %self.name(), "Clearing packet consumer");
        }
        self.shared.set_consumer(consumer);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("dedicated", &self.is_dedicated())
            .field("state", &self.state())
            .finish()
    }
}

/// Join side of a session thread.
pub(crate) struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// Marks the session failed if the reader thread unwinds.
struct PanicGuard(Arc<SessionShared>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(stream = %self.0.name(), "Reader thread panicked");
            self.0.close_source();
            self.0.finish(StopReason::Failed {
                message: "reader thread panicked".into(),
            });
        }
    }
}

impl Worker {
    /// Spawn the reader thread for `shared`.
    pub(crate) fn spawn(
        shared: Arc<SessionShared>,
        opener: Arc<dyn SourceOpener>,
        settings: EngineConfig,
    ) -> IngestResult<Self> {
        let name = shared.name().to_string();
        let (exit_tx, exited) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name(format!("reader-{name}"))
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                let _guard = PanicGuard(Arc::clone(&shared));
                let _ = shared.worker_thread.set(thread::current().id());
                ReaderLoop::new(shared, opener, settings).run();
            })?;

        Ok(Self {
            name,
            thread: Some(thread),
            exited,
        })
    }

    /// Check whether the caller is this worker's thread.
    pub(crate) fn is_current_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == thread::current().id())
    }

    /// Wait up to `timeout` for the thread to exit.
    pub(crate) fn wait(self, timeout: Duration) -> IngestResult<()> {
        self.wait_until(Instant::now() + timeout, timeout)
    }

    /// Wait until `deadline` for the thread to exit. On timeout the thread
    /// is detached; it keeps its own reference to the session state.
    pub(crate) fn wait_until(mut self, deadline: Instant, timeout: Duration) -> IngestResult<()> {
        match self.exited.recv_deadline(deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        error!(stream = %self.name, "Reader thread panicked");
                    }
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(IngestError::JoinTimeout {
                stream: self.name.clone(),
                timeout,
            }),
        }
    }
}

/// Returns true when nothing was read for longer than `window`.
pub(crate) fn watchdog_expired(last_progress: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(last_progress) > window
}

enum Flow {
    Continue,
    Cancelled,
}

/// Streams a session forwards to its consumer.
struct Tracks {
    video: StreamDescriptor,
    audio: Option<StreamDescriptor>,
}

impl Tracks {
    /// Resolve the video (required) and audio (optional) streams.
    fn resolve(source: &dyn PacketSource) -> Option<Self> {
        let streams = source.streams();
        let video = find_stream(streams, source.video_index()?)?;
        let audio = source
            .audio_index()
            .and_then(|index| find_stream(streams, index));

        Some(Self {
            video: StreamDescriptor::new(StreamKind::Video, video.clone()),
            audio: audio.map(|info| StreamDescriptor::new(StreamKind::Audio, info.clone())),
        })
    }

    fn descriptor(&self, stream_index: usize) -> Option<&StreamDescriptor> {
        if stream_index == self.video.info.index {
            return Some(&self.video);
        }
        self.audio
            .as_ref()
            .filter(|audio| audio.info.index == stream_index)
    }
}

/// Index must fall within the source's stream count.
fn find_stream(streams: &[StreamInfo], index: usize) -> Option<&StreamInfo> {
    if index >= streams.len() {
        return None;
    }
    streams.iter().find(|s| s.index == index)
}

/// The session thread's state machine.
struct ReaderLoop {
    shared: Arc<SessionShared>,
    opener: Arc<dyn SourceOpener>,
    settings: EngineConfig,
    policy: ReconnectPolicy,
    normalizer: TimestampNormalizer,
    source: Option<Box<dyn PacketSource>>,
    tracks: Option<Tracks>,
    attempts: u32,
    recovering: bool,
    last_progress: Instant,
}

impl ReaderLoop {
    fn new(shared: Arc<SessionShared>, opener: Arc<dyn SourceOpener>, settings: EngineConfig) -> Self {
        let transport = shared.config.transport;
        let policy = ReconnectPolicy::for_stream(transport, &shared.config.url);
        Self {
            shared,
            opener,
            settings,
            policy,
            normalizer: TimestampNormalizer::new(TimestampPolicy::from(transport)),
            source: None,
            tracks: None,
            attempts: 0,
            recovering: false,
            last_progress: Instant::now(),
        }
    }

    fn run(mut self) {
        info!(
            stream = %self.shared.name(),
            dedicated = self.shared.is_dedicated(),
            transport = %self.shared.config.transport,
            "Starting stream reader thread"
        );

        let reason = match self.drive() {
            Ok(()) => StopReason::Cancelled,
            Err(e) => {
                error!(stream = %self.shared.name(), error = %e, "Stream reader failed");
                StopReason::Failed {
                    message: e.to_string(),
                }
            }
        };

        self.close_source();
        self.shared.finish(reason);

        info!(stream = %self.shared.name(), "Stream reader thread exited");
    }

    fn drive(&mut self) -> IngestResult<()> {
        if let Flow::Cancelled = self.connect()? {
            return Ok(());
        }
        self.shared.transition(SessionState::Running);

        while self.shared.is_running() {
            if let Some(cause) = self.step()? {
                if let Flow::Cancelled = self.reconnect(cause)? {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Initial open with a bounded number of attempts.
    fn connect(&mut self) -> IngestResult<Flow> {
        let attempts = self.settings.open_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if !self.shared.is_running() {
                return Ok(Flow::Cancelled);
            }

            match self.opener.open(&self.shared.config.url, self.shared.config.transport) {
                Ok(source) => return self.install(source),
                Err(e) => {
                    warn!(
                        stream = %self.shared.name(),
                        attempt,
                        attempts,
                        error = %e,
                        "Failed to open input stream"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts && !self.shared.pause(self.settings.open_retry_delay()) {
                return Ok(Flow::Cancelled);
            }
        }

        if !self.shared.is_running() {
            return Ok(Flow::Cancelled);
        }

        Err(IngestError::OpenFailed {
            stream: self.shared.name().to_string(),
            attempts,
            source: last_error.unwrap_or_else(|| SourceError::Open("no attempt made".into())),
        })
    }

    /// Adopt an opened source: resolve its tracks and publish its closer.
    fn install(&mut self, source: Box<dyn PacketSource>) -> IngestResult<Flow> {
        let Some(tracks) = Tracks::resolve(source.as_ref()) else {
            source.closer().close();
            return Err(IngestError::NoVideoStream(self.shared.config.url.clone()));
        };

        if let Some(audio) = &tracks.audio {
            info!(
                stream = %self.shared.name(),
                index = audio.info.index,
                codec = %audio.info.codec,
                "Found audio stream"
            );
        }

        self.shared.publish_closer(source.closer());
        self.source = Some(source);
        self.tracks = Some(tracks);

        // A stop may have raced with the open and found no closer to call.
        if !self.shared.is_running() {
            self.close_source();
            return Ok(Flow::Cancelled);
        }

        Ok(Flow::Continue)
    }

    fn close_source(&mut self) {
        self.shared.closer.lock().take();
        if let Some(source) = self.source.take() {
            source.closer().close();
        }
    }

    /// One iteration of the running state. Returns the error that calls
    /// for a reconnect, if any.
    fn step(&mut self) -> IngestResult<Option<SourceError>> {
        if !self.shared.has_consumer() {
            self.shared.pause(self.settings.idle_poll());
            return Ok(None);
        }

        if !self.shared.is_running() {
            return Ok(None);
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(Some(SourceError::Closed));
        };

        match source.read_packet() {
            Ok(packet) => {
                self.on_packet(packet);
                Ok(None)
            }
            Err(err) => self.on_read_error(err),
        }
    }

    fn on_packet(&mut self, mut packet: Packet) {
        self.last_progress = Instant::now();
        self.shared.metrics.record_read(packet.size());

        if self.recovering {
            info!(
                stream = %self.shared.name(),
                attempts = self.attempts,
                "Stream recovered without reopening"
            );
            self.recovering = false;
            self.attempts = 0;
            self.shared.metrics.record_reconnect();
            self.shared.transition(SessionState::Running);
        }

        let guard = self.shared.packet_lock.lock();
        if !self.shared.is_running() {
            return;
        }

        let Some(tracks) = self.tracks.as_ref() else {
            return;
        };
        let Some(stream) = tracks.descriptor(packet.stream_index) else {
            trace!(stream_index = packet.stream_index, "Skipping untracked packet");
            return;
        };

        let repair = self.normalizer.normalize(&mut packet, &tracks.video.info);
        if repair.is_repaired() {
            self.shared.metrics.record_timestamp_repair();
            debug!(
                stream = %self.shared.name(),
                ?repair,
                pts = ?packet.pts,
                dts = ?packet.dts,
                "Repaired packet timestamps"
            );
        }

        dispatch(&self.shared, &guard, &packet, stream);
    }

    fn on_read_error(&mut self, err: SourceError) -> IngestResult<Option<SourceError>> {
        // Closed by a stopper: the loop condition ends the session.
        if !self.shared.is_running() {
            return Ok(None);
        }

        match err.class() {
            ReadErrorClass::Idle => {
                let window = self.settings.watchdog();
                if watchdog_expired(self.last_progress, Instant::now(), window) {
                    return Err(IngestError::ReadTimeout {
                        stream: self.shared.name().to_string(),
                        window,
                    });
                }
                Ok(Some(err))
            }
            ReadErrorClass::Disconnect => Ok(Some(err)),
            ReadErrorClass::Fatal => Err(IngestError::ReadFailed {
                stream: self.shared.name().to_string(),
                source: err,
            }),
        }
    }

    /// Recover from a disconnect, retrying until success or cancellation.
    fn reconnect(&mut self, cause: SourceError) -> IngestResult<Flow> {
        warn!(
            stream = %self.shared.name(),
            error = %cause,
            "Stream disconnected, attempting to reconnect"
        );

        loop {
            if !self.shared.is_running() {
                return Ok(Flow::Cancelled);
            }

            let decision = self.policy.decide(self.attempts);
            self.attempts = self.attempts.saturating_add(1);
            let attempt = self.attempts;

            self.shared.metrics.record_reconnect_attempt();
            self.shared.transition(SessionState::Reconnecting { attempt });
            info!(
                stream = %self.shared.name(),
                attempt,
                strategy = ?self.policy.strategy(),
                delay_ms = decision.delay.as_millis() as u64,
                reopen = decision.reopen,
                "Reconnection attempt"
            );

            if !self.shared.pause(decision.delay) {
                return Ok(Flow::Cancelled);
            }

            if !decision.reopen {
                self.recovering = true;
                return Ok(Flow::Continue);
            }

            self.close_source();
            match self.reopen(attempt) {
                Ok(Flow::Continue) => {
                    info!(
                        stream = %self.shared.name(),
                        attempts = attempt,
                        "Successfully reconnected"
                    );
                    self.attempts = 0;
                    self.recovering = false;
                    self.shared.metrics.record_reconnect();
                    self.shared.transition(SessionState::Running);
                    return Ok(Flow::Continue);
                }
                Ok(Flow::Cancelled) => return Ok(Flow::Cancelled),
                Err(e) => warn!(stream = %self.shared.name(), error = %e, "Reconnect failed"),
            }
        }
    }

    fn reopen(&mut self, attempt: u32) -> IngestResult<Flow> {
        let stream = self.shared.name().to_string();
        let failed = |reason: String| IngestError::ReconnectFailed {
            stream: stream.clone(),
            attempt,
            reason,
        };

        let source = self
            .opener
            .open(&self.shared.config.url, self.shared.config.transport)
            .map_err(|e| failed(e.to_string()))?;

        self.install(source).map_err(|e| failed(e.to_string()))
    }
}
