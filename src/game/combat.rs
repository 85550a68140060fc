//! Hit arbitration - projectiles, correlation tokens, pending hits and fallback

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, info, trace};

use crate::net::protocol::{HitMsg, PeerId, ShotMsg, Vec2};
use crate::util::time::unix_millis;

use super::tuning::{
    lerp_clamped, CONSUMED_RETENTION_MS, DAMAGE_MAX, DAMAGE_MIN, FIRE_COOLDOWN_MS, HIT_DEADLINE_MS,
    SPEED_MAX, SPEED_MIN,
};

/// Projectile hitbox radius
pub const PROJECTILE_RADIUS: f32 = 4.0;

/// Projectile in flight, keyed by its correlation token
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub pid: String,
    pub owner: PeerId,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Damage cached from the shot announcement
    pub damage: f32,
    pub spawned_at: u64,
}

impl Projectile {
    /// Move by `dt` seconds
    pub fn advance(&mut self, dt: f32) {
        self.position = self.position + self.velocity * dt;
    }

    /// Check collision with a circular target
    pub fn check_hit(&self, target: Vec2, target_radius: f32) -> bool {
        let combined_radius = PROJECTILE_RADIUS + target_radius;
        self.position.distance_squared(target) <= combined_radius * combined_radius
    }

    /// Spawn announcement for this projectile
    pub fn shot_msg(&self, name: &str, color: &str) -> ShotMsg {
        let direction = self.velocity.normalize_or_zero();
        ShotMsg {
            id: self.owner.clone(),
            name: Some(name.to_string()),
            color: Some(color.to_string()),
            pid: Some(self.pid.clone()),
            x: self.position.x,
            y: self.position.y,
            dx: direction.x,
            dy: direction.y,
            spd: self.velocity.length_squared().sqrt(),
            dmg: Some(self.damage),
            ts: unix_millis(),
        }
    }
}

/// Victim-side record awaiting authoritative confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHit {
    pub pid: String,
    pub damage: f32,
    pub observed_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    /// Declared by the attacker's `hit` broadcast
    Authoritative,
    /// Locally cached damage applied after the deadline
    Fallback,
}

/// What the session must do with a resolved hit
#[derive(Debug, Clone, PartialEq)]
pub enum HitResolution {
    Apply {
        target: PeerId,
        damage: f32,
        source: HitSource,
    },
    Ignored,
}

/// Correlation token `<id>:<unix-ms>:<random>`
pub fn correlation_token(owner: &PeerId) -> String {
    format!(
        "{}:{}:{}",
        owner,
        unix_millis(),
        rand::thread_rng().gen_range(0..1_000_000)
    )
}

/// Owns the projectile table, pending hits and the consumed-token set
pub struct HitArbiter {
    local_id: PeerId,
    projectiles: HashMap<String, Projectile>,
    pending: HashMap<String, PendingHit>,
    /// Resolved tokens and when they were resolved
    consumed: HashMap<String, u64>,
    next_fire_at: u64,
}

impl HitArbiter {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            projectiles: HashMap::new(),
            pending: HashMap::new(),
            consumed: HashMap::new(),
            next_fire_at: 0,
        }
    }

    /// Fire a local projectile. Gated on an active round, a live shooter and the cooldown.
    pub fn fire(
        &mut self,
        origin: Vec2,
        aim: Vec2,
        charge: f32,
        now: u64,
        round_active: bool,
        alive: bool,
    ) -> Option<Projectile> {
        if !round_active || !alive || now < self.next_fire_at {
            return None;
        }
        let direction = aim.normalize_or_zero();
        if direction == Vec2::ZERO {
            return None;
        }
        self.next_fire_at = now + FIRE_COOLDOWN_MS;

        let projectile = Projectile {
            pid: correlation_token(&self.local_id),
            owner: self.local_id.clone(),
            position: origin,
            velocity: direction * lerp_clamped(SPEED_MIN, SPEED_MAX, charge),
            damage: lerp_clamped(DAMAGE_MIN, DAMAGE_MAX, charge),
            spawned_at: now,
        };
        trace!(pid = %projectile.pid, damage = projectile.damage, "Projectile fired");
        self.projectiles
            .insert(projectile.pid.clone(), projectile.clone());
        Some(projectile)
    }

    /// Register a remote projectile from its `shot` announcement.
    /// Shots without a token or already known are ignored.
    pub fn register_remote_shot(&mut self, msg: &ShotMsg, now: u64) -> Option<&Projectile> {
        let Some(pid) = msg.pid.as_ref() else {
            debug!(peer_id = %msg.id, "Shot without correlation token");
            return None;
        };
        if self.projectiles.contains_key(pid) || self.consumed.contains_key(pid) {
            trace!(pid = %pid, "Duplicate shot");
            return None;
        }

        let damage = msg
            .dmg
            .filter(|d| d.is_finite())
            .unwrap_or(DAMAGE_MIN);
        let projectile = Projectile {
            pid: pid.clone(),
            owner: msg.id.clone(),
            position: Vec2::new(msg.x, msg.y),
            velocity: Vec2::new(msg.dx, msg.dy).normalize_or_zero() * msg.spd,
            damage,
            spawned_at: now,
        };
        self.projectiles.insert(pid.clone(), projectile);
        self.projectiles.get(pid)
    }

    /// Attacker path: an owned projectile overlapped a remote participant.
    /// Returns the authoritative hit to broadcast.
    pub fn on_remote_overlap(
        &mut self,
        pid: &str,
        target: &PeerId,
        now: u64,
        round_active: bool,
    ) -> Option<HitMsg> {
        if *target == self.local_id {
            return None;
        }
        match self.projectiles.get(pid) {
            Some(p) if p.owner == self.local_id => {}
            _ => return None,
        }
        let projectile = self.projectiles.remove(pid)?;
        if !round_active {
            return None;
        }

        self.consumed.insert(pid.to_string(), now);
        info!(pid = %pid, target = %target, damage = projectile.damage, "Hit landed");
        Some(HitMsg {
            from: self.local_id.clone(),
            pid: Some(projectile.pid),
            target_id: target.clone(),
            dmg: projectile.damage,
            ts: unix_millis(),
        })
    }

    /// Victim path: a remote projectile overlapped the local participant.
    /// Never applies damage; returns the reconciliation deadline to schedule.
    pub fn on_local_overlap(&mut self, pid: &str, now: u64, round_active: bool) -> Option<u64> {
        match self.projectiles.get(pid) {
            Some(p) if p.owner != self.local_id => {}
            _ => return None,
        }
        let projectile = self.projectiles.remove(pid)?;
        if !round_active || self.consumed.contains_key(pid) {
            return None;
        }

        debug!(pid = %pid, damage = projectile.damage, "Hit pending confirmation");
        self.pending.insert(
            pid.to_string(),
            PendingHit {
                pid: pid.to_string(),
                damage: projectile.damage,
                observed_at: now,
            },
        );
        Some(now + HIT_DEADLINE_MS)
    }

    /// Authoritative `hit` message. Applies at most once per token.
    pub fn on_hit_message(&mut self, msg: &HitMsg, now: u64) -> HitResolution {
        let Some(pid) = msg.pid.as_ref() else {
            debug!(from = %msg.from, "Hit without correlation token");
            return HitResolution::Ignored;
        };
        if !msg.dmg.is_finite() {
            debug!(pid = %pid, "Hit with non-finite damage");
            return HitResolution::Ignored;
        }
        if self.consumed.contains_key(pid) {
            trace!(pid = %pid, "Duplicate hit");
            return HitResolution::Ignored;
        }

        self.consumed.insert(pid.clone(), now);
        self.pending.remove(pid);
        self.projectiles.remove(pid);
        HitResolution::Apply {
            target: msg.target_id.clone(),
            damage: msg.dmg,
            source: HitSource::Authoritative,
        }
    }

    /// Reconciliation deadline. Applies the cached damage unless already resolved.
    pub fn on_deadline(&mut self, pid: &str, now: u64) -> HitResolution {
        if self.consumed.contains_key(pid) {
            return HitResolution::Ignored;
        }
        let Some(pending) = self.pending.remove(pid) else {
            return HitResolution::Ignored;
        };

        self.consumed.insert(pid.to_string(), now);
        info!(pid = %pid, damage = pending.damage, "Applying fallback hit");
        HitResolution::Apply {
            target: self.local_id.clone(),
            damage: pending.damage,
            source: HitSource::Fallback,
        }
    }

    /// Destroy a projectile on expiry or world contact. Unknown ids are a no-op.
    pub fn destroy_projectile(&mut self, pid: &str) -> bool {
        self.projectiles.remove(pid).is_some()
    }

    /// Drop projectiles and pending hits. Consumed tokens survive.
    pub fn clear_for_round(&mut self) {
        self.projectiles.clear();
        self.pending.clear();
    }

    /// Forget consumed tokens older than the retention window
    pub fn prune_consumed(&mut self, now: u64) {
        self.consumed
            .retain(|_, at| now.saturating_sub(*at) < CONSUMED_RETENTION_MS);
    }

    pub fn is_consumed(&self, pid: &str) -> bool {
        self.consumed.contains_key(pid)
    }

    pub fn pending(&self, pid: &str) -> Option<&PendingHit> {
        self.pending.get(pid)
    }

    pub fn projectile(&self, pid: &str) -> Option<&Projectile> {
        self.projectiles.get(pid)
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.values()
    }
}
