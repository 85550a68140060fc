//! Protocol and gameplay tuning constants

/// World dimensions
pub const WORLD_WIDTH: f32 = 1600.0;
pub const WORLD_HEIGHT: f32 = 900.0;

/// Spawn used when an assignment has no entry for a participant
pub const DEFAULT_SPAWN_X: f32 = 200.0;
pub const DEFAULT_SPAWN_Y: f32 = 760.0;

// Peer registry
pub const SNAP_DISTANCE: f32 = 80.0;
pub const EASE_FRACTION: f32 = 0.25;
pub const MAX_EXTRAPOLATION_MS: u64 = 150;
pub const STALE_AFTER_MS: u64 = 5_000;

// Health and combat
pub const MAX_HEALTH: f32 = 100.0;
pub const HIT_DEADLINE_MS: u64 = 180;
pub const FIRE_COOLDOWN_MS: u64 = 300;
pub const PROJECTILE_LIFESPAN_MS: u64 = 1_400;
pub const DAMAGE_MIN: f32 = 15.0;
pub const DAMAGE_MAX: f32 = 40.0;
pub const SPEED_MIN: f32 = 500.0;
pub const SPEED_MAX: f32 = 1_100.0;
pub const CONSUMED_RETENTION_MS: u64 = 30_000;

// Sync loop
pub const STATE_THROTTLE_MS: u64 = 120;
pub const STATE_HEARTBEAT_MS: u64 = 300;
pub const STATE_MOVE_EPSILON_SQ: f32 = 4.0;

/// Linear interpolation with `t` clamped to [0, 1]
pub fn lerp_clamped(min: f32, max: f32, t: f32) -> f32 {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    min + (max - min) * t
}
