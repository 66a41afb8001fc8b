//! Reconnection policy.

use std::time::Duration;

use camingest_types::Transport;

/// UDP read retries before the source is reopened.
const UDP_SOFT_RETRIES: u32 = 3;

/// Backoff family, chosen from the stream's transport and URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategy {
    /// ONVIF endpoints: short linear delays, then capped exponential backoff.
    Onvif,

    /// UDP: fixed delay, retry the read before reopening.
    Udp,

    /// TCP: capped exponential backoff.
    Tcp,
}

/// What to do for one reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    /// Wait before acting.
    pub delay: Duration,

    /// Close and reopen the source; otherwise just read again.
    pub reopen: bool,
}

/// Reconnection policy for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    strategy: ReconnectStrategy,
}

impl ReconnectPolicy {
    /// Pick the policy for a stream.
    pub fn for_stream(transport: Transport, url: &str) -> Self {
        let strategy = if looks_like_onvif(url) {
            ReconnectStrategy::Onvif
        } else {
            match transport {
                Transport::Udp => ReconnectStrategy::Udp,
                Transport::Tcp => ReconnectStrategy::Tcp,
            }
        };
        Self { strategy }
    }

    /// Policy with an explicit strategy.
    pub fn new(strategy: ReconnectStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ReconnectStrategy {
        self.strategy
    }

    /// Decide the attempt with zero-based consecutive index `attempt`.
    pub fn decide(&self, attempt: u32) -> ReconnectDecision {
        match self.strategy {
            ReconnectStrategy::Onvif => {
                let delay_ms = if attempt < 3 {
                    200 * u64::from(attempt + 1)
                } else {
                    (500u64 << (attempt - 3).min(4)).min(6_000)
                };
                ReconnectDecision {
                    delay: Duration::from_millis(delay_ms),
                    reopen: true,
                }
            }
            ReconnectStrategy::Udp => ReconnectDecision {
                delay: Duration::from_millis(500),
                reopen: attempt >= UDP_SOFT_RETRIES,
            },
            ReconnectStrategy::Tcp => ReconnectDecision {
                delay: Duration::from_millis((250u64 << attempt.min(5)).min(4_000)),
                reopen: true,
            },
        }
    }
}

/// Check whether a URL points at an ONVIF endpoint.
pub fn looks_like_onvif(url: &str) -> bool {
    url.to_ascii_lowercase().contains("onvif")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: ReconnectPolicy, attempts: u32) -> Vec<u64> {
        (0..attempts)
            .map(|n| policy.decide(n).delay.as_millis() as u64)
            .collect()
    }

    #[test]
    fn test_tcp_backoff_delays() {
        let policy = ReconnectPolicy::for_stream(Transport::Tcp, "rtsp://10.0.0.5/live");
        assert_eq!(policy.strategy(), ReconnectStrategy::Tcp);
        assert_eq!(
            delays(policy, 7),
            vec![250, 500, 1000, 2000, 4000, 4000, 4000]
        );
        assert!((0..10).all(|n| policy.decide(n).reopen));
    }

    #[test]
    fn test_udp_retries_read_before_reopening() {
        let policy = ReconnectPolicy::for_stream(Transport::Udp, "rtsp://10.0.0.5/live");
        assert_eq!(policy.strategy(), ReconnectStrategy::Udp);
        assert!(!policy.decide(0).reopen);
        assert!(!policy.decide(1).reopen);
        assert!(!policy.decide(2).reopen);
        assert!(policy.decide(3).reopen);
        assert!(policy.decide(20).reopen);
        assert!(delays(policy, 6).iter().all(|&d| d == 500));
    }

    #[test]
    fn test_onvif_backoff_delays() {
        let policy = ReconnectPolicy::for_stream(Transport::Udp, "rtsp://cam/onvif/media1");
        assert_eq!(policy.strategy(), ReconnectStrategy::Onvif);
        assert_eq!(
            delays(policy, 10),
            vec![200, 400, 600, 500, 1000, 2000, 4000, 6000, 6000, 6000]
        );
        assert!(policy.decide(0).reopen);
    }

    #[test]
    fn test_onvif_detection_ignores_case() {
        assert!(looks_like_onvif("rtsp://cam/ONVIF/profile1"));
        assert!(!looks_like_onvif("rtsp://cam/h264"));
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        for strategy in [
            ReconnectStrategy::Onvif,
            ReconnectStrategy::Udp,
            ReconnectStrategy::Tcp,
        ] {
            let decision = ReconnectPolicy::new(strategy).decide(u32::MAX - 1);
            assert!(decision.delay <= Duration::from_secs(6));
        }
    }
}
