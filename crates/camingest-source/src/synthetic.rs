//! Synthetic camera source for `stub://` URLs.
//!
//! Produces an H.264-like video stream (and optionally AAC-like audio) at a
//! fixed frame rate without touching the network. Query parameters shape
//! the output:
//!
//! - `fps`: frame rate, 1..=240 (default 30)
//! - `audio`: add an audio stream (`true`/`1`)
//! - `timestamps`: `full` (default), `missing` (no PTS/DTS), `dts` (DTS only)
//! - `limit`: number of video frames before end of stream
//!
//! Frame pacing waits on a channel that the closer signals, so a close from
//! another thread unblocks a pending read immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};
use url::Url;

use camingest_types::Transport;

use crate::error::SourceError;
use crate::packet::{Packet, Rational, StreamInfo};
use crate::{PacketSource, SourceCloser, SourceOpener, SourceResult};

/// URL scheme handled by the synthetic source.
pub const STUB_SCHEME: &str = "stub";

const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);
const AUDIO_TIME_BASE: Rational = Rational::new(1, 48_000);
const DEFAULT_FPS: u32 = 30;
const MAX_FPS: u32 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampMode {
    Full,
    Missing,
    DtsOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SyntheticSettings {
    fps: u32,
    audio: bool,
    timestamps: TimestampMode,
    limit: Option<u64>,
}

impl SyntheticSettings {
    fn parse(url: &str) -> SourceResult<Self> {
        let parsed = Url::parse(url).map_err(|e| SourceError::UnsupportedUrl(e.to_string()))?;
        if parsed.scheme() != STUB_SCHEME {
            return Err(SourceError::UnsupportedUrl(format!(
                "{url}: only {STUB_SCHEME}:// URLs are supported"
            )));
        }

        let mut settings = Self {
            fps: DEFAULT_FPS,
            audio: false,
            timestamps: TimestampMode::Full,
            limit: None,
        };

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "fps" => {
                    settings.fps = value
                        .parse()
                        .ok()
                        .filter(|fps| (1..=MAX_FPS).contains(fps))
                        .ok_or_else(|| SourceError::Open(format!("invalid fps: {value}")))?;
                }
                "audio" => settings.audio = matches!(value.as_ref(), "1" | "true" | "yes"),
                "timestamps" => {
                    settings.timestamps = match value.as_ref() {
                        "full" => TimestampMode::Full,
                        "missing" => TimestampMode::Missing,
                        "dts" => TimestampMode::DtsOnly,
                        other => {
                            return Err(SourceError::Open(format!(
                                "invalid timestamps mode: {other}"
                            )))
                        }
                    };
                }
                "limit" => {
                    let limit = value
                        .parse()
                        .map_err(|_| SourceError::Open(format!("invalid limit: {value}")))?;
                    settings.limit = Some(limit);
                }
                _ => debug!(key = %key, "Ignoring unknown stub parameter"),
            }
        }

        Ok(settings)
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps))
    }
}

/// Opens [`SyntheticSource`]s for `stub://` URLs.
#[derive(Debug, Default, Clone)]
pub struct SyntheticOpener;

impl SyntheticOpener {
    /// Create a new opener.
    pub fn new() -> Self {
        Self
    }
}

impl SourceOpener for SyntheticOpener {
    fn open(&self, url: &str, transport: Transport) -> SourceResult<Box<dyn PacketSource>> {
        let source = SyntheticSource::open(url, transport)?;
        Ok(Box::new(source))
    }
}

struct SyntheticCloser {
    closed: AtomicBool,
    wake_tx: Sender<()>,
}

impl SourceCloser for SyntheticCloser {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.wake_tx.try_send(());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Synthetic packet source.
pub struct SyntheticSource {
    url: String,
    settings: SyntheticSettings,
    streams: Vec<StreamInfo>,
    closer: Arc<SyntheticCloser>,
    wake_rx: Receiver<()>,
    frame_count: u64,
    pending_audio: Option<Packet>,
}

impl SyntheticSource {
    /// Open a synthetic source for `url`.
    pub fn open(url: &str, transport: Transport) -> SourceResult<Self> {
        let settings = SyntheticSettings::parse(url)?;

        let mut streams = vec![StreamInfo::video(
            0,
            "h264",
            VIDEO_TIME_BASE,
            Rational::new(settings.fps as i32, 1),
        )];
        if settings.audio {
            streams.push(StreamInfo::audio(1, "aac", AUDIO_TIME_BASE));
        }

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        info!(url = %url, %transport, fps = settings.fps, "Opened synthetic source");

        Ok(Self {
            url: url.to_string(),
            settings,
            streams,
            closer: Arc::new(SyntheticCloser {
                closed: AtomicBool::new(false),
                wake_tx,
            }),
            wake_rx,
            frame_count: 0,
            pending_audio: None,
        })
    }

    /// Number of video frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.frame_count
    }

    fn timestamps(&self, ts: i64) -> (Option<i64>, Option<i64>) {
        match self.settings.timestamps {
            TimestampMode::Full => (Some(ts), Some(ts)),
            TimestampMode::Missing => (None, None),
            TimestampMode::DtsOnly => (None, Some(ts)),
        }
    }

    fn next_video(&mut self) -> Packet {
        self.frame_count += 1;

        let duration = i64::from(VIDEO_TIME_BASE.den) / i64::from(self.settings.fps);
        let (pts, dts) = self.timestamps(self.frame_count as i64 * duration);
        let keyframe = (self.frame_count - 1) % u64::from(self.settings.fps) == 0;

        let nal_header = if keyframe { 0x65 } else { 0x41 };
        let payload = Bytes::from(vec![0x00, 0x00, 0x00, 0x01, nal_header, 0x88, 0x84, 0x00]);

        let packet = Packet::new(0, payload).with_timestamps(pts, dts);
        if keyframe {
            packet.keyframe()
        } else {
            packet
        }
    }

    fn next_audio(&self) -> Packet {
        let samples = i64::from(AUDIO_TIME_BASE.den) / i64::from(self.settings.fps);
        let (pts, dts) = self.timestamps(self.frame_count as i64 * samples);
        Packet::new(1, Bytes::from_static(&[0x21, 0x10, 0x04, 0x60])).with_timestamps(pts, dts)
    }
}

impl PacketSource for SyntheticSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> SourceResult<Packet> {
        if self.closer.is_closed() {
            return Err(SourceError::Closed);
        }

        if let Some(audio) = self.pending_audio.take() {
            return Ok(audio);
        }

        if let Some(limit) = self.settings.limit {
            if self.frame_count >= limit {
                return Err(SourceError::EndOfStream);
            }
        }

        match self.wake_rx.recv_timeout(self.settings.frame_interval()) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(SourceError::Closed),
        }

        let video = self.next_video();
        if self.settings.audio {
            self.pending_audio = Some(self.next_audio());
        }
        Ok(video)
    }

    fn closer(&self) -> Arc<dyn SourceCloser> {
        Arc::clone(&self.closer) as Arc<dyn SourceCloser>
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.closer.close();
        debug!(url = %self.url, frames = self.frame_count, "Synthetic source dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_parse_defaults() {
        let settings = SyntheticSettings::parse("stub://front").unwrap();
        assert_eq!(settings.fps, DEFAULT_FPS);
        assert!(!settings.audio);
        assert_eq!(settings.timestamps, TimestampMode::Full);
        assert_eq!(settings.limit, None);
    }

    #[test]
    fn test_parse_query() {
        let settings =
            SyntheticSettings::parse("stub://yard?fps=25&audio=1&timestamps=missing&limit=10")
                .unwrap();
        assert_eq!(settings.fps, 25);
        assert!(settings.audio);
        assert_eq!(settings.timestamps, TimestampMode::Missing);
        assert_eq!(settings.limit, Some(10));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            SyntheticSettings::parse("rtsp://10.0.0.2/stream"),
            Err(SourceError::UnsupportedUrl(_))
        ));
        assert!(matches!(
            SyntheticSettings::parse("stub://cam?fps=0"),
            Err(SourceError::Open(_))
        ));
    }

    #[test]
    fn test_produces_video_then_audio() {
        let mut source = SyntheticSource::open("stub://cam?fps=200&audio=true", Transport::Tcp)
            .unwrap();
        assert_eq!(source.video_index(), Some(0));
        assert_eq!(source.audio_index(), Some(1));

        let video = source.read_packet().unwrap();
        assert_eq!(video.stream_index, 0);
        assert!(video.is_keyframe);
        assert_eq!(video.pts, Some(450));

        let audio = source.read_packet().unwrap();
        assert_eq!(audio.stream_index, 1);
        assert_eq!(audio.pts, Some(240));
    }

    #[test]
    fn test_limit_reaches_end_of_stream() {
        let mut source =
            SyntheticSource::open("stub://cam?fps=240&limit=2&timestamps=dts", Transport::Udp)
                .unwrap();
        let first = source.read_packet().unwrap();
        assert_eq!(first.pts, None);
        assert!(first.dts.is_some());
        source.read_packet().unwrap();
        assert!(matches!(source.read_packet(), Err(SourceError::EndOfStream)));
        assert_eq!(source.frames_produced(), 2);
    }

    #[test]
    fn test_close_unblocks_read() {
        let mut source = SyntheticSource::open("stub://cam?fps=1", Transport::Tcp).unwrap();
        let closer = source.closer();

        let started = Instant::now();
        let handle = thread::spawn(move || source.read_packet());
        thread::sleep(Duration::from_millis(50));
        closer.close();
        closer.close();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SourceError::Closed)));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(closer.is_closed());
    }
}
