//! Relay server: room-scoped UDP fan-out with presence tracking

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;

use super::protocol::{PeerId, PresenceRecord, PresenceSnapshot, RelayFrame};

/// How often stale members are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A room member as seen by the relay
#[derive(Debug, Clone)]
pub struct Member {
    pub key: PeerId,
    pub addr: SocketAddr,
    pub presence: Option<PresenceRecord>,
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<PeerId, Member>,
}

impl Room {
    fn key_for(&self, addr: SocketAddr) -> Option<PeerId> {
        self.members
            .values()
            .find(|m| m.addr == addr)
            .map(|m| m.key.clone())
    }
}

/// Registry of all rooms on this relay
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add or re-address a member. Returns true when membership changed;
    /// a repeated join from the same address only refreshes liveness.
    pub fn join(&self, room: &str, key: PeerId, addr: SocketAddr, now: Instant) -> bool {
        let mut entry = self.rooms.entry(room.to_string()).or_default();
        match entry.members.get_mut(&key) {
            Some(member) => {
                let moved = member.addr != addr;
                member.addr = addr;
                member.last_seen = now;
                moved
            }
            None => {
                entry.members.insert(
                    key.clone(),
                    Member {
                        key,
                        addr,
                        presence: None,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Member key registered for `addr` in `room`
    pub fn member_key(&self, room: &str, addr: SocketAddr) -> Option<PeerId> {
        self.rooms.get(room).and_then(|r| r.key_for(addr))
    }

    /// Refresh liveness for the member at `addr`. Returns false for non-members.
    pub fn touch(&self, room: &str, addr: SocketAddr, now: Instant) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room) else {
            return false;
        };
        match entry.members.values_mut().find(|m| m.addr == addr) {
            Some(member) => {
                member.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Store the presence record of the member at `addr`.
    /// Returns true when the stored record changed.
    pub fn track(
        &self,
        room: &str,
        addr: SocketAddr,
        mut presence: PresenceRecord,
        now: Instant,
    ) -> bool {
        let Some(mut entry) = self.rooms.get_mut(room) else {
            return false;
        };
        let Some(member) = entry.members.values_mut().find(|m| m.addr == addr) else {
            return false;
        };
        // A member may only publish under its own key
        presence.id = member.key.clone();
        member.last_seen = now;
        if member.presence.as_ref() == Some(&presence) {
            return false;
        }
        member.presence = Some(presence);
        true
    }

    /// Remove a member. Returns true if it existed.
    pub fn leave(&self, room: &str, key: &PeerId, addr: SocketAddr) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut entry) => {
                let owned = entry
                    .members
                    .get(key)
                    .map(|m| m.addr == addr)
                    .unwrap_or(false);
                owned && entry.members.remove(key).is_some()
            }
            None => false,
        };
        self.rooms.remove_if(room, |_, r| r.members.is_empty());
        removed
    }

    /// Addresses of every member except `exclude`
    pub fn recipients(&self, room: &str, exclude: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.rooms
            .get(room)
            .map(|r| {
                r.members
                    .values()
                    .map(|m| m.addr)
                    .filter(|addr| Some(*addr) != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Presence snapshot of a room, sorted by key. Members that have not tracked yet
    /// appear with an id-only record.
    pub fn snapshot(&self, room: &str) -> PresenceSnapshot {
        let mut players: PresenceSnapshot = self
            .rooms
            .get(room)
            .map(|r| {
                r.members
                    .values()
                    .map(|m| {
                        m.presence
                            .clone()
                            .unwrap_or_else(|| PresenceRecord::new(m.key.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    /// Evict members silent for longer than `timeout`. Returns the rooms that changed.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut changed = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            let before = entry.members.len();
            entry
                .members
                .retain(|_, m| now.saturating_duration_since(m.last_seen) <= timeout);
            if entry.members.len() != before {
                changed.push(entry.key().clone());
            }
        }
        self.rooms.retain(|_, r| !r.members.is_empty());
        changed
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_members(&self) -> usize {
        self.rooms.iter().map(|r| r.members.len()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The relay server loop
pub struct RelayServer {
    socket: Arc<UdpSocket>,
    registry: Arc<RoomRegistry>,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    pub async fn bind(
        config: Arc<RelayConfig>,
        registry: Arc<RoomRegistry>,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        Ok(Self {
            socket,
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the receive loop and the stale-member sweep until the task is dropped
    pub async fn run(self) {
        info!(addr = ?self.socket.local_addr().ok(), "Relay listening");

        let sweeper = tokio::spawn(sweep_loop(
            self.socket.clone(),
            self.registry.clone(),
            Duration::from_millis(self.config.member_timeout_ms),
        ));

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    debug!(error = %e, "Relay receive failed");
                    continue;
                }
            };

            match serde_json::from_slice::<RelayFrame>(&buf[..len]) {
                Ok(frame) => self.handle_frame(frame, addr).await,
                Err(e) => debug!(from = %addr, error = %e, "Dropping undecodable frame"),
            }

            if sweeper.is_finished() {
                warn!("Relay sweeper stopped");
                break;
            }
        }
    }

    async fn handle_frame(&self, frame: RelayFrame, addr: SocketAddr) {
        let now = Instant::now();
        match frame {
            RelayFrame::Join { room, key, token } => {
                if token != self.config.token {
                    warn!(from = %addr, "Rejected join with invalid token");
                    return;
                }
                if self.registry.join(&room, key.clone(), addr, now) {
                    info!(room = %room, key = %key, from = %addr, "Member joined");
                    publish_sync(&self.socket, &self.registry, &room).await;
                }
            }
            RelayFrame::Track { room, presence } => {
                if self.registry.track(&room, addr, presence, now) {
                    publish_sync(&self.socket, &self.registry, &room).await;
                }
            }
            RelayFrame::Broadcast { room, payload } => {
                if !self.registry.touch(&room, addr, now) {
                    debug!(from = %addr, room = %room, "Broadcast from non-member dropped");
                    return;
                }
                let frame = RelayFrame::Broadcast {
                    room: room.clone(),
                    payload,
                };
                let recipients = self.registry.recipients(&room, Some(addr));
                send_to_all(&self.socket, &frame, &recipients).await;
            }
            RelayFrame::Leave { room, key } => {
                if self.registry.leave(&room, &key, addr) {
                    info!(room = %room, key = %key, "Member left");
                    publish_sync(&self.socket, &self.registry, &room).await;
                }
            }
            RelayFrame::Sync { .. } => {
                debug!(from = %addr, "Ignoring sync frame from member");
            }
        }
    }
}

async fn sweep_loop(socket: Arc<UdpSocket>, registry: Arc<RoomRegistry>, timeout: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for room in registry.sweep(Instant::now(), timeout) {
            info!(room = %room, "Evicted stale members");
            publish_sync(&socket, &registry, &room).await;
        }
    }
}

async fn publish_sync(socket: &UdpSocket, registry: &RoomRegistry, room: &str) {
    let frame = RelayFrame::Sync {
        room: room.to_string(),
        players: registry.snapshot(room),
    };
    let recipients = registry.recipients(room, None);
    send_to_all(socket, &frame, &recipients).await;
}

async fn send_to_all(socket: &UdpSocket, frame: &RelayFrame, recipients: &[SocketAddr]) {
    let bytes = match serde_json::to_vec(frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Failed to encode relay frame");
            return;
        }
    };
    for addr in recipients {
        if let Err(e) = socket.send_to(&bytes, addr).await {
            debug!(to = %addr, error = %e, "Relay send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportCredentials;
    use crate::net::channel::{Channel, ChannelEvent, UdpChannel, HEARTBEAT_INTERVAL};
    use serde_json::json;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn track_requires_membership_and_pins_key() {
        let registry = RoomRegistry::new();
        let now = Instant::now();
        let mut spoofed = PresenceRecord::new(PeerId::from("mallory"));
        spoofed.name = Some("a".to_string());

        assert!(!registry.track("lobby", addr(1), spoofed.clone(), now));

        registry.join("lobby", PeerId::from("a"), addr(1), now);
        assert!(registry.track("lobby", addr(1), spoofed.clone(), now));
        assert!(!registry.track("lobby", addr(1), spoofed, now));

        let snapshot = registry.snapshot("lobby");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, PeerId::from("a"));
    }

    #[test]
    fn recipients_exclude_sender() {
        let registry = RoomRegistry::new();
        let now = Instant::now();
        registry.join("lobby", PeerId::from("a"), addr(1), now);
        registry.join("lobby", PeerId::from("b"), addr(2), now);
        registry.join("other", PeerId::from("c"), addr(3), now);

        assert_eq!(registry.recipients("lobby", Some(addr(1))), vec![addr(2)]);
        assert_eq!(registry.active_rooms(), 2);
        assert_eq!(registry.total_members(), 3);
    }

    #[test]
    fn sweep_evicts_silent_members_and_empty_rooms() {
        let registry = RoomRegistry::new();
        let start = Instant::now();
        registry.join("lobby", PeerId::from("a"), addr(1), start);
        registry.join("lobby", PeerId::from("b"), addr(2), start);
        registry.join("quiet", PeerId::from("c"), addr(3), start);

        let later = start + Duration::from_secs(8);
        assert!(registry.touch("lobby", addr(2), later));

        let mut changed =
            registry.sweep(start + Duration::from_secs(11), Duration::from_secs(10));
        changed.sort();
        assert_eq!(changed, vec!["lobby".to_string(), "quiet".to_string()]);
        assert_eq!(registry.active_rooms(), 1);
        assert_eq!(registry.member_key("lobby", addr(2)), Some(PeerId::from("b")));
    }

    #[test]
    fn repeated_join_only_refreshes_liveness() {
        let registry = RoomRegistry::new();
        let start = Instant::now();
        assert!(registry.join("lobby", PeerId::from("a"), addr(1), start));
        assert!(!registry.join("lobby", PeerId::from("a"), addr(1), start + Duration::from_secs(9)));
        assert!(registry.join("lobby", PeerId::from("a"), addr(2), start + Duration::from_secs(9)));

        assert!(registry
            .sweep(start + Duration::from_secs(11), Duration::from_secs(10))
            .is_empty());
        assert_eq!(registry.member_key("lobby", addr(2)), Some(PeerId::from("a")));
    }

    #[test]
    fn leave_must_come_from_member_address() {
        let registry = RoomRegistry::new();
        let now = Instant::now();
        registry.join("lobby", PeerId::from("a"), addr(1), now);
        assert!(!registry.leave("lobby", &PeerId::from("a"), addr(9)));
        assert!(registry.leave("lobby", &PeerId::from("a"), addr(1)));
        assert_eq!(registry.active_rooms(), 0);
    }

    async fn start_relay() -> (Arc<RoomRegistry>, TransportCredentials, tokio::task::JoinHandle<()>) {
        let config = Arc::new(RelayConfig {
            bind_addr: addr(0),
            http_addr: addr(0),
            token: "secret".to_string(),
            member_timeout_ms: 10_000,
            log_level: "info".to_string(),
        });
        let registry = Arc::new(RoomRegistry::new());
        let server = RelayServer::bind(config, registry.clone()).await.unwrap();
        let port = server.local_addr().unwrap().port();
        let relay_task = tokio::spawn(server.run());

        let credentials = TransportCredentials {
            relay_addr: format!("localhost:{}", port),
            token: "secret".to_string(),
        };
        (registry, credentials, relay_task)
    }

    async fn wait_for_members(registry: &RoomRegistry, count: usize, attempts: usize) -> bool {
        for _ in 0..attempts {
            if registry.total_members() == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.total_members() == count
    }

    #[tokio::test]
    async fn relay_forwards_broadcasts_between_udp_members() {
        let (registry, credentials, relay_task) = start_relay().await;
        let mut a = UdpChannel::connect(&credentials, "lobby", PresenceRecord::new(PeerId::from("a")))
            .await
            .unwrap();
        let mut b = UdpChannel::connect(&credentials, "lobby", PresenceRecord::new(PeerId::from("b")))
            .await
            .unwrap();

        // Wait until both members are registered before broadcasting
        assert!(wait_for_members(&registry, 2, 100).await);
        a.broadcast(json!({ "kind": "dead", "id": "a", "ts": 1 })).unwrap();

        let mut got_message = false;
        for _ in 0..200 {
            while let Some(event) = b.try_recv() {
                if let ChannelEvent::Message(payload) = event {
                    assert_eq!(payload["id"], "a");
                    got_message = true;
                }
            }
            if got_message {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(got_message);

        a.close();
        b.close();
        relay_task.abort();
    }

    #[tokio::test]
    async fn evicted_member_rejoins_on_heartbeat() {
        let (registry, credentials, relay_task) = start_relay().await;
        let mut a = UdpChannel::connect(&credentials, "lobby", PresenceRecord::new(PeerId::from("a")))
            .await
            .unwrap();
        assert!(wait_for_members(&registry, 1, 100).await);

        registry.sweep(Instant::now() + Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(registry.total_members(), 0);

        // Next heartbeat is at most one interval away
        let attempts = (HEARTBEAT_INTERVAL.as_millis() as usize + 1_500) / 10;
        assert!(wait_for_members(&registry, 1, attempts).await);
        assert_eq!(registry.snapshot("lobby")[0].id, PeerId::from("a"));

        a.close();
        relay_task.abort();
    }
}
