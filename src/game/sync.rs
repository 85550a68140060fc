//! Outbound state publication, decoupled from the tick rate

use crate::net::protocol::{PeerId, PresencePatch, StateMsg, Vec2};
use crate::util::time::unix_millis;

use super::tuning::{STATE_HEARTBEAT_MS, STATE_MOVE_EPSILON_SQ, STATE_THROTTLE_MS};

/// Throttle plus idle heartbeat for local state reports
#[derive(Debug, Default)]
pub struct StateSync {
    last_sent_at: Option<u64>,
    last_position: Vec2,
}

impl StateSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most one report per throttle window. An idle participant still
    /// reports once per heartbeat so remote peers keep it alive.
    pub fn due(&mut self, now: u64, position: Vec2) -> bool {
        if let Some(last) = self.last_sent_at {
            let since = now.saturating_sub(last);
            if since < STATE_THROTTLE_MS {
                return false;
            }
            let moved = position.distance_squared(self.last_position) > STATE_MOVE_EPSILON_SQ;
            if !moved && since < STATE_HEARTBEAT_MS {
                return false;
            }
        }
        self.last_sent_at = Some(now);
        self.last_position = position;
        true
    }

    pub fn state_msg(id: &PeerId, position: Vec2, velocity: Vec2, aim: Vec2) -> StateMsg {
        StateMsg {
            id: id.clone(),
            x: position.x,
            y: position.y,
            vx: velocity.x,
            vy: velocity.y,
            aim,
            ts: unix_millis(),
        }
    }

    /// Presence fields refreshed with every state report
    pub fn presence_patch(position: Vec2, velocity: Vec2) -> PresencePatch {
        PresencePatch {
            position: Some(position),
            velocity: Some(velocity),
            ..Default::default()
        }
    }
}
