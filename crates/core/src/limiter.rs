//! Outbound Rate Limiter
//!
//! Client-side policy for realtime chunks. Audio-only frames are paced: slowly
//! during a ramp-up window, then at a steady cadence. Anything that arrives
//! too early is dropped, never queued. Frames that carry video, or that are
//! not realtime media at all, bypass the limiter.

use std::time::{Duration, Instant};

/// Number of audio chunks sent at the initial cadence.
pub const RAMPUP_CHUNKS: u32 = 10;
/// Minimum gap between audio chunks during ramp-up.
pub const INITIAL_INTERVAL: Duration = Duration::from_millis(300);
/// Minimum gap between audio chunks afterwards (about 8 per second).
pub const STEADY_INTERVAL: Duration = Duration::from_millis(125);

/// What a realtime frame is made of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaMix {
    pub audio: bool,
    pub video: bool,
}

impl MediaMix {
    /// Builds the mix from the mime types of the chunks in one frame.
    pub fn from_mime_types<'a>(mime_types: impl IntoIterator<Item = &'a str>) -> Self {
        let mut mix = MediaMix::default();
        for mime_type in mime_types {
            if mime_type.starts_with("audio/") {
                mix.audio = true;
            } else if mime_type.starts_with("video/") || mime_type.starts_with("image/") {
                mix.video = true;
            }
        }
        mix
    }

    pub fn is_audio_only(&self) -> bool {
        self.audio && !self.video
    }
}

/// Why a send attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TransportClosed,
    TooSoon { wait: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    Send,
    Drop(DropReason),
}

impl SendDecision {
    pub fn is_send(&self) -> bool {
        matches!(self, SendDecision::Send)
    }
}

/// Tunables of the pacing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub rampup_chunks: u32,
    pub initial_interval: Duration,
    pub steady_interval: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            rampup_chunks: RAMPUP_CHUNKS,
            initial_interval: INITIAL_INTERVAL,
            steady_interval: STEADY_INTERVAL,
        }
    }
}

/// Per-connection pacing state. Owned by exactly one connection.
#[derive(Debug, Clone, Default)]
pub struct OutboundRateLimiter {
    policy: RatePolicy,
    chunks_sent: u32,
    last_send: Option<Instant>,
}

impl OutboundRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Audio chunks accepted so far.
    pub fn chunks_sent(&self) -> u32 {
        self.chunks_sent
    }

    /// The gap the next audio chunk has to respect.
    pub fn current_interval(&self) -> Duration {
        if self.chunks_sent < self.policy.rampup_chunks {
            self.policy.initial_interval
        } else {
            self.policy.steady_interval
        }
    }

    pub fn check(&mut self, mix: MediaMix, transport_open: bool) -> SendDecision {
        self.check_at(mix, transport_open, Instant::now())
    }

    /// Decides whether a frame may go out at `now`, recording the send when
    /// an audio-only frame is accepted.
    pub fn check_at(&mut self, mix: MediaMix, transport_open: bool, now: Instant) -> SendDecision {
        if !transport_open {
            return SendDecision::Drop(DropReason::TransportClosed);
        }
        if !mix.is_audio_only() {
            return SendDecision::Send;
        }

        let interval = self.current_interval();
        if let Some(last) = self.last_send {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < interval {
                return SendDecision::Drop(DropReason::TooSoon {
                    wait: interval - elapsed,
                });
            }
        }

        self.chunks_sent += 1;
        self.last_send = Some(now);
        SendDecision::Send
    }
}
