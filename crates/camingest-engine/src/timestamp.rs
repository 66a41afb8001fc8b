//! Packet timestamp repair.
//!
//! Cameras reached over UDP regularly deliver packets with missing or
//! non-positive PTS/DTS. Downstream muxers reject those, so every tracked
//! packet passes through a [`TimestampNormalizer`] before dispatch.

use camingest_source::{Packet, Rational, StreamInfo};
use camingest_types::Transport;

/// Frame duration assumed when the stream does not report a usable rate:
/// 30 fps in a 1/90000 time base.
pub const DEFAULT_FRAME_DURATION: i64 = 3_000;

/// Repair rules applied to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Cross-fill, extrapolate from the previous packet, clamp.
    Udp,

    /// Cross-fill and clamp only.
    Tcp,
}

impl From<Transport> for TimestampPolicy {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Udp => Self::Udp,
            Transport::Tcp => Self::Tcp,
        }
    }
}

/// What the normalizer changed on a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampRepair {
    /// Timestamps were already valid.
    Untouched,

    /// One missing timestamp was copied from the other.
    CrossFilled,

    /// Both were missing and were derived from the previous packet.
    Extrapolated,

    /// Both were missing and were set to 1.
    Defaulted,

    /// A non-positive timestamp was replaced.
    Clamped,
}

impl TimestampRepair {
    pub fn is_repaired(self) -> bool {
        self != Self::Untouched
    }
}

/// Per-session timestamp state.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    policy: TimestampPolicy,
    last_pts: i64,
    frame_duration: i64,
    initialized: bool,
}

impl TimestampNormalizer {
    /// Create a normalizer with no history.
    pub fn new(policy: TimestampPolicy) -> Self {
        Self {
            policy,
            last_pts: 0,
            frame_duration: 0,
            initialized: false,
        }
    }

    /// Create a normalizer that continues from a known previous packet.
    pub fn with_history(policy: TimestampPolicy, last_pts: i64, frame_duration: i64) -> Self {
        Self {
            policy,
            last_pts,
            frame_duration,
            initialized: true,
        }
    }

    /// PTS of the last normalized packet.
    pub fn last_pts(&self) -> i64 {
        self.last_pts
    }

    /// Frame duration in video time-base units, zero until first needed.
    pub fn current_frame_duration(&self) -> i64 {
        self.frame_duration
    }

    /// Repair `packet` in place. `video` is the tracked video stream and
    /// supplies the frame rate used for extrapolation.
    pub fn normalize(&mut self, packet: &mut Packet, video: &StreamInfo) -> TimestampRepair {
        if !self.initialized {
            self.last_pts = 0;
            self.frame_duration = 0;
            self.initialized = true;
        }

        let mut repair = TimestampRepair::Untouched;
        let (mut pts, mut dts) = match (packet.pts, packet.dts) {
            (Some(pts), Some(dts)) => (pts, dts),
            (None, Some(dts)) => {
                repair = TimestampRepair::CrossFilled;
                (dts, dts)
            }
            (Some(pts), None) => {
                repair = TimestampRepair::CrossFilled;
                (pts, pts)
            }
            (None, None) => {
                let ts = if self.policy == TimestampPolicy::Udp && self.last_pts > 0 {
                    repair = TimestampRepair::Extrapolated;
                    self.last_pts.saturating_add(self.frame_duration_for(video))
                } else {
                    repair = TimestampRepair::Defaulted;
                    1
                };
                (ts, ts)
            }
        };

        if pts <= 0 || dts <= 0 {
            if pts <= 0 {
                pts = if dts > 0 { dts } else { 1 };
            }
            if dts <= 0 {
                dts = if pts > 0 { pts } else { 1 };
            }
            repair = TimestampRepair::Clamped;
        }

        packet.pts = Some(pts);
        packet.dts = Some(dts);
        self.last_pts = pts;

        repair
    }

    fn frame_duration_for(&mut self, video: &StreamInfo) -> i64 {
        if self.frame_duration == 0 {
            self.frame_duration = frame_duration(video.avg_frame_rate, video.time_base)
                .unwrap_or(DEFAULT_FRAME_DURATION);
        }
        self.frame_duration
    }
}

/// Duration of one frame in `time_base` units, rounded half away from zero.
///
/// Returns `None` when either rational is unusable or the result rounds to
/// zero.
pub fn frame_duration(frame_rate: Rational, time_base: Rational) -> Option<i64> {
    if !frame_rate.is_positive() || !time_base.is_positive() {
        return None;
    }

    let num = i128::from(frame_rate.den) * i128::from(time_base.den);
    let den = i128::from(frame_rate.num) * i128::from(time_base.num);
    let rounded = (2 * num + den) / (2 * den);

    if rounded <= 0 {
        None
    } else {
        i64::try_from(rounded).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video_30fps() -> StreamInfo {
        StreamInfo::video(0, "h264", Rational::new(1, 90_000), Rational::new(30, 1))
    }

    fn packet(pts: Option<i64>, dts: Option<i64>) -> Packet {
        Packet::new(0, Bytes::from_static(&[0x65])).with_timestamps(pts, dts)
    }

    #[test]
    fn test_udp_extrapolates_from_last_pts() {
        let mut normalizer = TimestampNormalizer::with_history(TimestampPolicy::Udp, 1000, 300);
        let mut pkt = packet(None, None);

        let repair = normalizer.normalize(&mut pkt, &video_30fps());

        assert_eq!(repair, TimestampRepair::Extrapolated);
        assert_eq!(pkt.pts, Some(1300));
        assert_eq!(pkt.dts, Some(1300));
        assert_eq!(normalizer.last_pts(), 1300);
    }

    #[test]
    fn test_udp_extrapolation_saturates_near_max() {
        let mut normalizer = TimestampNormalizer::new(TimestampPolicy::Udp);

        let mut first = packet(Some(i64::MAX - 10), Some(i64::MAX - 10));
        normalizer.normalize(&mut first, &video_30fps());

        let mut second = packet(None, None);
        let repair = normalizer.normalize(&mut second, &video_30fps());

        assert_eq!(repair, TimestampRepair::Extrapolated);
        assert_eq!(second.pts, Some(i64::MAX));
        assert_eq!(second.dts, Some(i64::MAX));
        assert_eq!(normalizer.last_pts(), i64::MAX);
    }

    #[test]
    fn test_negative_pts_takes_positive_dts() {
        for policy in [TimestampPolicy::Udp, TimestampPolicy::Tcp] {
            let mut normalizer = TimestampNormalizer::new(policy);
            let mut pkt = packet(Some(-5), Some(200));

            let repair = normalizer.normalize(&mut pkt, &video_30fps());

            assert_eq!(repair, TimestampRepair::Clamped);
            assert_eq!(pkt.pts, Some(200), "{policy:?}");
            assert_eq!(pkt.dts, Some(200), "{policy:?}");
        }
    }

    #[test]
    fn test_both_negative_clamp_to_one() {
        for policy in [TimestampPolicy::Udp, TimestampPolicy::Tcp] {
            let mut normalizer = TimestampNormalizer::new(policy);
            let mut pkt = packet(Some(-5), Some(-5));

            normalizer.normalize(&mut pkt, &video_30fps());

            assert_eq!(pkt.pts, Some(1), "{policy:?}");
            assert_eq!(pkt.dts, Some(1), "{policy:?}");
        }
    }

    #[test]
    fn test_cross_fill_missing_field() {
        let mut normalizer = TimestampNormalizer::new(TimestampPolicy::Tcp);

        let mut pkt = packet(None, Some(4500));
        assert_eq!(
            normalizer.normalize(&mut pkt, &video_30fps()),
            TimestampRepair::CrossFilled
        );
        assert_eq!(pkt.pts, Some(4500));

        let mut pkt = packet(Some(7500), None);
        normalizer.normalize(&mut pkt, &video_30fps());
        assert_eq!(pkt.dts, Some(7500));
        assert_eq!(normalizer.last_pts(), 7500);
    }

    #[test]
    fn test_first_packet_without_timestamps_starts_at_one() {
        let mut normalizer = TimestampNormalizer::new(TimestampPolicy::Udp);
        let mut pkt = packet(None, None);

        assert_eq!(
            normalizer.normalize(&mut pkt, &video_30fps()),
            TimestampRepair::Defaulted
        );
        assert_eq!(pkt.pts, Some(1));
        assert_eq!(pkt.dts, Some(1));
    }

    #[test]
    fn test_udp_computes_frame_duration_lazily() {
        let video = StreamInfo::video(0, "h264", Rational::new(1, 90_000), Rational::new(25, 1));
        let mut normalizer = TimestampNormalizer::new(TimestampPolicy::Udp);

        let mut first = packet(Some(9000), Some(9000));
        assert_eq!(
            normalizer.normalize(&mut first, &video),
            TimestampRepair::Untouched
        );
        assert_eq!(normalizer.current_frame_duration(), 0);

        let mut second = packet(None, None);
        normalizer.normalize(&mut second, &video);
        assert_eq!(normalizer.current_frame_duration(), 3600);
        assert_eq!(second.pts, Some(12_600));
    }

    #[test]
    fn test_udp_defaults_frame_duration_for_unusable_rate() {
        let video = StreamInfo::video(0, "h264", Rational::new(1, 90_000), Rational::new(0, 0));
        let mut normalizer = TimestampNormalizer::with_history(TimestampPolicy::Udp, 500, 0);
        let mut pkt = packet(None, None);

        normalizer.normalize(&mut pkt, &video);

        assert_eq!(normalizer.current_frame_duration(), DEFAULT_FRAME_DURATION);
        assert_eq!(pkt.pts, Some(3500));
    }

    #[test]
    fn test_tcp_never_extrapolates() {
        let mut normalizer = TimestampNormalizer::with_history(TimestampPolicy::Tcp, 1000, 300);
        let mut pkt = packet(None, None);

        assert_eq!(
            normalizer.normalize(&mut pkt, &video_30fps()),
            TimestampRepair::Defaulted
        );
        assert_eq!(pkt.pts, Some(1));
        assert_eq!(normalizer.current_frame_duration(), 300);
    }

    #[test]
    fn test_frame_duration_values() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(frame_duration(Rational::new(30, 1), tb), Some(3000));
        assert_eq!(frame_duration(Rational::new(25, 1), tb), Some(3600));
        assert_eq!(frame_duration(Rational::new(30_000, 1001), tb), Some(3003));
        assert_eq!(
            frame_duration(Rational::new(30, 1), Rational::new(1, 1000)),
            Some(33)
        );
        assert_eq!(frame_duration(Rational::new(-30, 1), tb), None);
        assert_eq!(frame_duration(Rational::new(30, 1), Rational::new(0, 1)), None);
    }
}
