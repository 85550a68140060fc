//! Rate limiting utilities for outbound traffic

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a limiter that admits one cell per `period` with no burst allowance
pub fn create_spacing_limiter(period: Duration) -> Limiter {
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN);
    RateLimiter::direct(quota)
}

/// Soft limit for non-critical broadcasts
pub const BROADCAST_RATE_LIMIT: u32 = 15; // Max 15 state messages per second

/// Minimum spacing between presence tracks
pub const PRESENCE_PERIOD_MS: u64 = 800;

/// Outbound limiter state owned by the transport adapter
pub struct OutboundLimiter {
    broadcast: Limiter,
    presence: Limiter,
}

impl OutboundLimiter {
    pub fn new() -> Self {
        Self {
            broadcast: create_spacing_limiter(Duration::from_millis(
                1000 / u64::from(BROADCAST_RATE_LIMIT),
            )),
            presence: create_spacing_limiter(Duration::from_millis(PRESENCE_PERIOD_MS)),
        }
    }

    /// Check if a non-critical broadcast is allowed (returns true if allowed)
    pub fn check_broadcast(&self) -> bool {
        self.broadcast.check().is_ok()
    }

    /// Check if a presence track is allowed (returns true if allowed)
    pub fn check_presence(&self) -> bool {
        self.presence.check().is_ok()
    }
}

impl Default for OutboundLimiter {
    fn default() -> Self {
        Self::new()
    }
}
