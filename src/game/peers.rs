//! Peer registry: remote participants, interpolation and liveness

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::net::protocol::{PeerId, PresenceRecord, SpawnAssignment, StateMsg, Vec2};

use super::tuning::{
    DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y, EASE_FRACTION, MAX_EXTRAPOLATION_MS, MAX_HEALTH,
    SNAP_DISTANCE, STALE_AFTER_MS,
};

pub const DEFAULT_NAME: &str = "guest";
pub const DEFAULT_COLOR: &str = "#60a5fa";

/// A participant in the arena, local or remote
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: PeerId,
    pub name: String,
    pub color: String,
    /// Rendered position
    pub position: Vec2,
    pub velocity: Vec2,
    /// Local receive time of the last refresh
    pub last_seen: u64,
    pub alive: bool,
    pub health: f32,
}

impl Participant {
    pub fn new(id: PeerId, name: String, color: String, position: Vec2, now: u64) -> Self {
        Self {
            id,
            name,
            color,
            position,
            velocity: Vec2::ZERO,
            last_seen: now,
            alive: true,
            health: MAX_HEALTH,
        }
    }
}

/// Optional seed values for a lazily created participant
#[derive(Debug, Clone, Default)]
pub struct ParticipantHint {
    pub name: Option<String>,
    pub color: Option<String>,
    pub position: Option<Vec2>,
}

impl From<&PresenceRecord> for ParticipantHint {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            name: record.name.clone(),
            color: record.color.clone(),
            position: record.position(),
        }
    }
}

/// Result of applying damage to a participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    /// Unknown or already dead
    Ignored,
    Damaged { health: f32 },
    /// Health crossed to zero on this hit
    Killed,
}

/// Ids added and removed by a presence reconciliation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

#[derive(Debug, Clone)]
struct RemotePeer {
    participant: Participant,
    /// Last reported position
    target: Vec2,
    /// Last position hint seen in presence
    presence_hint: Option<Vec2>,
}

impl RemotePeer {
    fn new(id: PeerId, hint: ParticipantHint, now: u64) -> Self {
        let position = hint
            .position
            .unwrap_or(Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y));
        Self {
            participant: Participant::new(
                id,
                hint.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
                hint.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
                position,
                now,
            ),
            target: position,
            presence_hint: hint.position,
        }
    }

    /// Dead-reckoned target, extrapolation capped
    fn predicted_target(&self, now: u64) -> Vec2 {
        let elapsed_ms = now
            .saturating_sub(self.participant.last_seen)
            .min(MAX_EXTRAPOLATION_MS);
        self.target + self.participant.velocity * (elapsed_ms as f32 / 1000.0)
    }

    fn interpolate(&mut self, now: u64) {
        let predicted = self.predicted_target(now);
        let position = self.participant.position;
        if position.distance_squared(predicted) > SNAP_DISTANCE * SNAP_DISTANCE {
            self.participant.position = self.target;
        } else {
            self.participant.position = position + (predicted - position) * EASE_FRACTION;
        }
    }
}

/// Owns every remote participant, keyed by id
pub struct PeerRegistry {
    local_id: PeerId,
    peers: BTreeMap<PeerId, RemotePeer>,
}

impl PeerRegistry {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: BTreeMap::new(),
        }
    }

    /// Set-diff against a full presence snapshot
    pub fn reconcile(&mut self, snapshot: &[PresenceRecord], now: u64) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for record in snapshot {
            if record.id == self.local_id {
                continue;
            }
            match self.peers.get_mut(&record.id) {
                None => {
                    let hint = ParticipantHint::from(record);
                    let mut peer = RemotePeer::new(record.id.clone(), hint, now);
                    peer.participant.velocity = record.velocity();
                    info!(peer_id = %record.id, name = %peer.participant.name, "Peer joined");
                    self.peers.insert(record.id.clone(), peer);
                    outcome.added.push(record.id.clone());
                }
                Some(peer) => {
                    if let Some(name) = record.name.as_ref() {
                        if *name != peer.participant.name {
                            peer.participant.name = name.clone();
                        }
                    }
                    if let Some(color) = record.color.as_ref() {
                        if *color != peer.participant.color {
                            peer.participant.color = color.clone();
                        }
                    }
                    if let Some(hint) = record.position() {
                        if peer.presence_hint != Some(hint) {
                            peer.presence_hint = Some(hint);
                            peer.target = hint;
                        }
                    }
                }
            }
        }

        let present: std::collections::HashSet<&PeerId> = snapshot.iter().map(|r| &r.id).collect();
        let departed: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect();
        for id in departed {
            self.peers.remove(&id);
            info!(peer_id = %id, "Peer left");
            outcome.removed.push(id);
        }

        outcome
    }

    pub fn get(&self, id: &PeerId) -> Option<&Participant> {
        self.peers.get(id).map(|p| &p.participant)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Get or lazily create a participant announced by a message before presence
    pub fn ensure(&mut self, id: &PeerId, hint: ParticipantHint, now: u64) -> &Participant {
        let peer = self.peers.entry(id.clone()).or_insert_with(|| {
            debug!(peer_id = %id, "Creating peer ahead of presence");
            RemotePeer::new(id.clone(), hint, now)
        });
        &peer.participant
    }

    /// Record a position report. Returns false for unknown ids.
    pub fn apply_state(&mut self, msg: &StateMsg, now: u64) -> bool {
        let Some(peer) = self.peers.get_mut(&msg.id) else {
            return false;
        };
        peer.target = Vec2::new(msg.x, msg.y);
        peer.participant.velocity = Vec2::new(msg.vx, msg.vy);
        peer.participant.last_seen = now;
        true
    }

    /// Refresh liveness without touching position
    pub fn touch(&mut self, id: &PeerId, now: u64) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.participant.last_seen = now;
        }
    }

    /// Mark a participant dead. Returns true only on the alive -> dead transition.
    pub fn mark_dead(&mut self, id: &PeerId, now: u64) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) if peer.participant.alive => {
                peer.participant.alive = false;
                peer.participant.last_seen = now;
                info!(peer_id = %id, "Peer marked dead");
                true
            }
            _ => false,
        }
    }

    /// Subtract damage from a remote participant's health
    pub fn apply_damage(&mut self, id: &PeerId, amount: f32) -> DamageOutcome {
        let Some(peer) = self.peers.get_mut(id) else {
            return DamageOutcome::Ignored;
        };
        let participant = &mut peer.participant;
        if !participant.alive {
            return DamageOutcome::Ignored;
        }
        participant.health = (participant.health - amount).clamp(0.0, MAX_HEALTH);
        if participant.health <= 0.0 {
            participant.alive = false;
            DamageOutcome::Killed
        } else {
            DamageOutcome::Damaged {
                health: participant.health,
            }
        }
    }

    /// Place every participant on its spawn, alive and at full health
    pub fn reset_for_round(&mut self, spawns: &SpawnAssignment) {
        for (id, peer) in self.peers.iter_mut() {
            let spawn = spawns
                .get(id)
                .copied()
                .unwrap_or(Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y));
            peer.target = spawn;
            peer.participant.position = spawn;
            peer.participant.velocity = Vec2::ZERO;
            peer.participant.health = MAX_HEALTH;
            peer.participant.alive = true;
        }
    }

    /// Prune stale participants, then interpolate the rest. Returns the pruned ids.
    pub fn tick(&mut self, now: u64) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.participant.last_seen) > STALE_AFTER_MS)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
            info!(peer_id = %id, "Pruned stale peer");
        }

        for peer in self.peers.values_mut() {
            peer.interpolate(now);
        }
        stale
    }

    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.peers.values().map(|p| &p.participant)
    }

    pub fn alive_ids(&self) -> Vec<PeerId> {
        self.iter()
            .filter(|p| p.alive)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.iter().filter(|p| p.alive).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
