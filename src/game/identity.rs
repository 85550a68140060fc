//! Local identity: per-session id, display name and derived color

use rand::Rng;
use uuid::Uuid;

use crate::net::protocol::{PeerId, PresenceRecord, Vec2};

/// Longest display name kept after sanitising
pub const MAX_NAME_LEN: usize = 16;

/// Identity of the local participant, fixed for the whole session
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub id: PeerId,
    pub name: String,
    pub color: String,
}

impl LocalIdentity {
    /// Fresh identity with a new UUID v4
    pub fn generate(raw_name: Option<&str>) -> Self {
        Self::with_id(PeerId::new(Uuid::new_v4().to_string()), raw_name)
    }

    pub fn with_id(id: PeerId, raw_name: Option<&str>) -> Self {
        let color = color_from_id(id.as_str());
        Self {
            name: sanitize_name(raw_name.unwrap_or_default()),
            color,
            id,
        }
    }

    /// Presence record announcing this identity at `position`
    pub fn presence(&self, position: Vec2) -> PresenceRecord {
        PresenceRecord {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            color: Some(self.color.clone()),
            x: Some(position.x),
            y: Some(position.y),
            vx: Some(0.0),
            vy: Some(0.0),
        }
    }
}

/// Deterministic hue from the id
pub fn color_from_id(id: &str) -> String {
    let hue = id
        .chars()
        .fold(0u32, |h, c| (h * 31 + c as u32) % 360);
    format!("hsl({} 80% 60%)", hue)
}

/// Trim, collapse whitespace, keep word characters, space and '-', cap the length.
/// Falls back to `p<0..999>` when nothing is left.
pub fn sanitize_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned: String = collapsed
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == ' ' || *c == '-')
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        format!("p{}", rand::thread_rng().gen_range(0..1000))
    } else {
        cleaned
    }
}
