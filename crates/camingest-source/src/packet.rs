//! Packet and stream metadata types.

use bytes::Bytes;

/// A rational number, used for time bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// Create a new rational.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Check that both terms are strictly positive.
    pub fn is_positive(self) -> bool {
        self.num > 0 && self.den > 0
    }
}

/// Media type of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

/// Metadata for one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream index; packets carry this value in `stream_index`.
    pub index: usize,

    /// Media type.
    pub kind: MediaKind,

    /// Codec name (e.g., "h264", "aac").
    pub codec: String,

    /// Time base of packet timestamps.
    pub time_base: Rational,

    /// Average frame rate, zero when unknown.
    pub avg_frame_rate: Rational,
}

impl StreamInfo {
    /// Describe a video stream.
    pub fn video(index: usize, codec: &str, time_base: Rational, avg_frame_rate: Rational) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base,
            avg_frame_rate,
        }
    }

    /// Describe an audio stream.
    pub fn audio(index: usize, codec: &str, time_base: Rational) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base,
            avg_frame_rate: Rational::new(0, 1),
        }
    }
}

/// An encoded packet read from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Index of the stream this packet belongs to.
    pub stream_index: usize,

    /// Presentation timestamp in stream time base, if present.
    pub pts: Option<i64>,

    /// Decode timestamp in stream time base, if present.
    pub dts: Option<i64>,

    /// Whether this is a keyframe (for video).
    pub is_keyframe: bool,

    /// Encoded payload.
    pub data: Bytes,
}

impl Packet {
    /// Create a packet without timestamps.
    pub fn new(stream_index: usize, data: Bytes) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            is_keyframe: false,
            data,
        }
    }

    /// Set both timestamps.
    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Mark as keyframe.
    pub fn keyframe(mut self) -> Self {
        self.is_keyframe = true;
        self
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
