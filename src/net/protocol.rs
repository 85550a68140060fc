//! Broadcast protocol message definitions
//! These are the wire types exchanged between peers and with the relay

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque participant identity, ordered lexicographically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// 2D vector used for positions, velocities and aim
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance_squared(self, other: Vec2) -> f32 {
        (other - self).length_squared()
    }

    /// Unit vector in the same direction, or zero for a zero vector
    pub fn normalize_or_zero(self) -> Vec2 {
        let len = self.length_squared().sqrt();
        if len > f32::EPSILON {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Static platform rectangle, positioned by its centre
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "w")]
    pub width: f32,
    #[serde(rename = "h")]
    pub height: f32,
}

/// Ordered platform list, the first entry is the ground
pub type ArenaLayout = Vec<Platform>;

/// Spawn point per participant id
pub type SpawnAssignment = BTreeMap<PeerId, Vec2>;

/// Presence record upserted under the participant's key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub id: PeerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub vx: Option<f32>,
    #[serde(default)]
    pub vy: Option<f32>,
}

impl PresenceRecord {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            name: None,
            color: None,
            x: None,
            y: None,
            vx: None,
            vy: None,
        }
    }

    /// Position hint, only when both coordinates are present
    pub fn position(&self) -> Option<Vec2> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some(Vec2::new(x, y)),
            _ => None,
        }
    }

    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx.unwrap_or(0.0), self.vy.unwrap_or(0.0))
    }

    /// Merge the fields set in `patch`, leaving the others untouched
    pub fn merge(&mut self, patch: PresencePatch) {
        if let Some(name) = patch.name {
            self.name = Some(name);
        }
        if let Some(color) = patch.color {
            self.color = Some(color);
        }
        if let Some(position) = patch.position {
            self.x = Some(position.x);
            self.y = Some(position.y);
        }
        if let Some(velocity) = patch.velocity {
            self.vx = Some(velocity.x);
            self.vy = Some(velocity.y);
        }
    }
}

/// Partial presence update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub position: Option<Vec2>,
    pub velocity: Option<Vec2>,
}

/// Full replace-all presence view of a room
pub type PresenceSnapshot = Vec<PresenceRecord>;

/// Periodic position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMsg {
    pub id: PeerId,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub vx: f32,
    #[serde(default)]
    pub vy: f32,
    #[serde(default)]
    pub aim: Vec2,
    #[serde(default)]
    pub ts: u64,
}

/// Projectile spawn announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotMsg {
    pub id: PeerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Correlation token
    #[serde(default)]
    pub pid: Option<String>,
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub spd: f32,
    #[serde(default)]
    pub dmg: Option<f32>,
    #[serde(default)]
    pub ts: u64,
}

/// Authoritative damage application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitMsg {
    pub from: PeerId,
    #[serde(default)]
    pub pid: Option<String>,
    pub target_id: PeerId,
    pub dmg: f32,
    #[serde(default)]
    pub ts: u64,
}

/// Death notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadMsg {
    pub id: PeerId,
    #[serde(default)]
    pub ts: u64,
}

/// Authoritative round transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundMsg {
    pub from: PeerId,
    /// Number of the round this message starts, 0 when the sender does not number rounds
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub winner_id: Option<PeerId>,
    #[serde(default)]
    pub layout: ArenaLayout,
    #[serde(default)]
    pub spawns: SpawnAssignment,
    #[serde(default)]
    pub ts: u64,
}

/// Messages broadcast to every member of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastMessage {
    State(StateMsg),
    Shot(ShotMsg),
    Hit(HitMsg),
    Dead(DeadMsg),
    Round(RoundMsg),
    /// Unknown kind or malformed payload
    #[serde(other)]
    Ignored,
}

impl BroadcastMessage {
    /// Decode an inbound payload. Never fails: anything unusable maps to `Ignored`.
    pub fn decode(payload: Value) -> Self {
        match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(error = %e, "Ignoring malformed broadcast payload");
                BroadcastMessage::Ignored
            }
        }
    }

    /// Declared sender, `id` for state/shot/dead and `from` for hit/round
    pub fn sender(&self) -> Option<&PeerId> {
        match self {
            BroadcastMessage::State(m) => Some(&m.id),
            BroadcastMessage::Shot(m) => Some(&m.id),
            BroadcastMessage::Dead(m) => Some(&m.id),
            BroadcastMessage::Hit(m) => Some(&m.from),
            BroadcastMessage::Round(m) => Some(&m.from),
            BroadcastMessage::Ignored => None,
        }
    }

    /// Critical kinds bypass the outbound rate limit
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            BroadcastMessage::Hit(_) | BroadcastMessage::Dead(_) | BroadcastMessage::Round(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastMessage::State(_) => "state",
            BroadcastMessage::Shot(_) => "shot",
            BroadcastMessage::Hit(_) => "hit",
            BroadcastMessage::Dead(_) => "dead",
            BroadcastMessage::Round(_) => "round",
            BroadcastMessage::Ignored => "ignored",
        }
    }
}

/// Frames exchanged between a peer and the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Peer -> relay: join a room
    Join {
        room: String,
        key: PeerId,
        token: String,
    },
    /// Peer -> relay: upsert own presence record (doubles as heartbeat)
    Track {
        room: String,
        presence: PresenceRecord,
    },
    /// Both directions: room-scoped broadcast
    Broadcast { room: String, payload: Value },
    /// Peer -> relay: leave the room
    Leave { room: String, key: PeerId },
    /// Relay -> peer: full presence snapshot
    Sync {
        room: String,
        players: PresenceSnapshot,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_uses_camel_case_target() {
        let msg = BroadcastMessage::Hit(HitMsg {
            from: PeerId::from("a"),
            pid: Some("a:1:2".to_string()),
            target_id: PeerId::from("b"),
            dmg: 25.0,
            ts: 7,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "hit");
        assert_eq!(value["targetId"], "b");
        assert_eq!(value["pid"], "a:1:2");
    }

    #[test]
    fn round_payload_decodes_with_null_winner() {
        let payload = json!({
            "kind": "round",
            "from": "a",
            "winnerId": null,
            "layout": [{ "x": 800.0, "y": 860.0, "w": 1600.0, "h": 40.0 }],
            "spawns": { "a": { "x": 10.0, "y": 20.0 }, "b": { "x": 30.0, "y": 40.0 } },
            "ts": 1
        });
        match BroadcastMessage::decode(payload) {
            BroadcastMessage::Round(round) => {
                assert!(round.winner_id.is_none());
                assert_eq!(round.round, 0);
                assert_eq!(round.layout[0].width, 1600.0);
                assert_eq!(round.spawns[&PeerId::from("b")], Vec2::new(30.0, 40.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_is_ignored() {
        let msg = BroadcastMessage::decode(json!({ "kind": "emote", "id": "a" }));
        assert_eq!(msg, BroadcastMessage::Ignored);
        assert!(msg.sender().is_none());
    }

    #[test]
    fn malformed_known_kind_is_ignored() {
        let msg = BroadcastMessage::decode(json!({ "kind": "hit", "from": "a" }));
        assert_eq!(msg, BroadcastMessage::Ignored);
        let msg = BroadcastMessage::decode(json!("not an object"));
        assert_eq!(msg, BroadcastMessage::Ignored);
    }

    #[test]
    fn only_hit_dead_round_are_critical() {
        let state = BroadcastMessage::State(StateMsg {
            id: PeerId::from("a"),
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            aim: Vec2::ZERO,
            ts: 0,
        });
        let dead = BroadcastMessage::Dead(DeadMsg {
            id: PeerId::from("a"),
            ts: 0,
        });
        assert!(!state.is_critical());
        assert!(dead.is_critical());
        assert_eq!(state.sender(), Some(&PeerId::from("a")));
    }

    #[test]
    fn presence_merge_keeps_unrelated_fields() {
        let mut record = PresenceRecord::new(PeerId::from("a"));
        record.merge(PresencePatch {
            name: Some("ann".to_string()),
            color: Some("hsl(1 80% 60%)".to_string()),
            ..Default::default()
        });
        record.merge(PresencePatch {
            position: Some(Vec2::new(5.0, 6.0)),
            ..Default::default()
        });
        assert_eq!(record.name.as_deref(), Some("ann"));
        assert_eq!(record.position(), Some(Vec2::new(5.0, 6.0)));
        assert_eq!(record.velocity(), Vec2::ZERO);
    }

    #[test]
    fn relay_frames_are_tagged_by_event() {
        let frame = RelayFrame::Leave {
            room: "lobby".to_string(),
            key: PeerId::from("a"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["event"], "leave");
        assert_eq!(value["key"], "a");
    }
}
