//! Raw best-effort pub/sub channels underneath the transport adapter

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TransportCredentials;

use super::protocol::{PeerId, PresenceRecord, PresenceSnapshot, RelayFrame};
use super::TransportError;

/// Presence heartbeat interval towards the relay
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Largest datagram the relay client accepts
const MAX_DATAGRAM: usize = 64 * 1024;

/// Event delivered by a channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Full replace-all presence snapshot
    Presence(PresenceSnapshot),
    /// Undecoded broadcast payload
    Message(Value),
}

/// A room-scoped broadcast + presence channel. Every operation is non-blocking.
pub trait Channel: Send {
    /// Fire-and-forget broadcast to the room
    fn broadcast(&mut self, payload: Value) -> Result<(), TransportError>;

    /// Upsert the local presence record
    fn track(&mut self, presence: &PresenceRecord) -> Result<(), TransportError>;

    /// Next inbound event, if any
    fn try_recv(&mut self) -> Option<ChannelEvent>;

    /// Leave the room. Closing twice is a no-op.
    fn close(&mut self);

    fn is_offline(&self) -> bool {
        false
    }
}

/// Degenerate channel used when no transport credentials exist
pub struct OfflineChannel {
    initial: Option<PresenceSnapshot>,
}

impl OfflineChannel {
    pub fn new(local: PresenceRecord) -> Self {
        Self {
            initial: Some(vec![local]),
        }
    }
}

impl Channel for OfflineChannel {
    fn broadcast(&mut self, _payload: Value) -> Result<(), TransportError> {
        Ok(())
    }

    fn track(&mut self, _presence: &PresenceRecord) -> Result<(), TransportError> {
        Ok(())
    }

    fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.initial.take().map(ChannelEvent::Presence)
    }

    fn close(&mut self) {
        self.initial = None;
    }

    fn is_offline(&self) -> bool {
        true
    }
}

struct HubInner {
    tx: broadcast::Sender<ChannelEvent>,
    presence: Mutex<BTreeMap<PeerId, PresenceRecord>>,
    muted: Mutex<HashSet<PeerId>>,
}

impl HubInner {
    fn publish_presence(&self) {
        let snapshot: PresenceSnapshot = self.presence.lock().values().cloned().collect();
        // No subscribers is fine
        let _ = self.tx.send(ChannelEvent::Presence(snapshot));
    }
}

/// In-process room. Every subscriber, the sender included, sees every broadcast.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                tx,
                presence: Mutex::new(BTreeMap::new()),
                muted: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Subscribe a member under `key`
    pub fn join(&self, key: PeerId) -> HubChannel {
        HubChannel {
            key,
            rx: self.inner.tx.subscribe(),
            hub: self.inner.clone(),
            closed: false,
        }
    }

    /// Drop every broadcast sent by `key` while muted
    pub fn set_muted(&self, key: &PeerId, muted: bool) {
        let mut set = self.inner.muted.lock();
        if muted {
            set.insert(key.clone());
        } else {
            set.remove(key);
        }
    }

    /// Remove a member's presence as if its connection dropped
    pub fn evict(&self, key: &PeerId) {
        if self.inner.presence.lock().remove(key).is_some() {
            self.inner.publish_presence();
        }
    }

    pub fn member_count(&self) -> usize {
        self.inner.presence.lock().len()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Member handle on a [`MemoryHub`]
pub struct HubChannel {
    key: PeerId,
    rx: broadcast::Receiver<ChannelEvent>,
    hub: Arc<HubInner>,
    closed: bool,
}

impl Channel for HubChannel {
    fn broadcast(&mut self, payload: Value) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.hub.muted.lock().contains(&self.key) {
            return Ok(());
        }
        let _ = self.hub.tx.send(ChannelEvent::Message(payload));
        Ok(())
    }

    fn track(&mut self, presence: &PresenceRecord) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.hub
            .presence
            .lock()
            .insert(self.key.clone(), presence.clone());
        self.hub.publish_presence();
        Ok(())
    }

    fn try_recv(&mut self) -> Option<ChannelEvent> {
        if self.closed {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(key = %self.key, lagged_count = n, "Hub member lagged, skipping events");
                }
                Err(_) => return None,
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.hub.presence.lock().remove(&self.key).is_some() {
            self.hub.publish_presence();
        }
    }
}

/// JSON-over-UDP member of a relay room
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    relay_addr: SocketAddr,
    room: String,
    key: PeerId,
    presence: Arc<Mutex<PresenceRecord>>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    closed: bool,
}

impl UdpChannel {
    /// Bind a local socket, join `room` on the relay and start the reader and heartbeat tasks
    pub async fn connect(
        credentials: &TransportCredentials,
        room: &str,
        presence: PresenceRecord,
    ) -> Result<Self, TransportError> {
        let relay_addr = resolve_relay(&credentials.relay_addr).await?;
        let local: SocketAddr = if relay_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = Arc::new(UdpSocket::bind(local).await?);
        let key = presence.id.clone();
        let join = RelayFrame::Join {
            room: room.to_string(),
            key: key.clone(),
            token: credentials.token.clone(),
        };

        send_frame(&socket, relay_addr, &join).await?;
        send_frame(
            &socket,
            relay_addr,
            &RelayFrame::Track {
                room: room.to_string(),
                presence: presence.clone(),
            },
        )
        .await?;

        info!(relay = %relay_addr, room = %room, key = %key, "Joined relay room");

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(socket.clone(), relay_addr, inbound_tx));

        let presence = Arc::new(Mutex::new(presence));
        let heartbeat = tokio::spawn(heartbeat_loop(
            socket.clone(),
            relay_addr,
            join,
            room.to_string(),
            presence.clone(),
        ));

        Ok(Self {
            socket,
            relay_addr,
            room: room.to_string(),
            key,
            presence,
            inbound,
            reader,
            heartbeat,
            closed: false,
        })
    }

    fn try_send(&self, frame: &RelayFrame) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(frame)?;
        self.socket.try_send_to(&bytes, self.relay_addr)?;
        Ok(())
    }
}

impl Channel for UdpChannel {
    fn broadcast(&mut self, payload: Value) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.try_send(&RelayFrame::Broadcast {
            room: self.room.clone(),
            payload,
        })
    }

    fn track(&mut self, presence: &PresenceRecord) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        *self.presence.lock() = presence.clone();
        self.try_send(&RelayFrame::Track {
            room: self.room.clone(),
            presence: presence.clone(),
        })
    }

    fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.try_recv().ok()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let leave = RelayFrame::Leave {
            room: self.room.clone(),
            key: self.key.clone(),
        };
        if let Err(e) = self.try_send(&leave) {
            debug!(error = %e, "Failed to send leave frame");
        }
        self.reader.abort();
        self.heartbeat.abort();
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

/// Resolve a `host:port` relay endpoint, preferring IPv4
async fn resolve_relay(endpoint: &str) -> Result<SocketAddr, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint).await?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TransportError::Unresolved(endpoint.to_string()))
}

async fn send_frame(
    socket: &UdpSocket,
    addr: SocketAddr,
    frame: &RelayFrame,
) -> Result<(), TransportError> {
    let bytes = serde_json::to_vec(frame)?;
    socket.send_to(&bytes, addr).await?;
    Ok(())
}

/// Reader task: relay datagrams -> inbound queue
async fn read_loop(
    socket: Arc<UdpSocket>,
    relay_addr: SocketAddr,
    inbound_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!(error = %e, "Relay socket receive failed");
                continue;
            }
        };
        if from != relay_addr {
            continue;
        }

        let event = match serde_json::from_slice::<RelayFrame>(&buf[..len]) {
            Ok(RelayFrame::Broadcast { payload, .. }) => ChannelEvent::Message(payload),
            Ok(RelayFrame::Sync { players, .. }) => ChannelEvent::Presence(players),
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Dropping undecodable relay frame");
                continue;
            }
        };

        if inbound_tx.send(event).is_err() {
            break;
        }
    }
}

/// Heartbeat task: re-join, then re-track the latest presence. A lost join or an
/// eviction by the relay heals on the next beat.
async fn heartbeat_loop(
    socket: Arc<UdpSocket>,
    relay_addr: SocketAddr,
    join: RelayFrame,
    room: String,
    presence: Arc<Mutex<PresenceRecord>>,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick is immediate and connect already sent both frames
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let track = RelayFrame::Track {
            room: room.clone(),
            presence: presence.lock().clone(),
        };
        for frame in [&join, &track] {
            if let Err(e) = send_frame(&socket, relay_addr, frame).await {
                debug!(error = %e, "Presence heartbeat failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offline_channel_reports_only_local_presence_once() {
        let mut channel = OfflineChannel::new(PresenceRecord::new(PeerId::from("me")));
        match channel.try_recv() {
            Some(ChannelEvent::Presence(players)) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, PeerId::from("me"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(channel.broadcast(json!({ "kind": "dead" })).is_ok());
        assert!(channel.try_recv().is_none());
        assert!(channel.is_offline());
    }

    #[test]
    fn hub_fans_out_to_every_member_including_sender() {
        let hub = MemoryHub::new();
        let mut a = hub.join(PeerId::from("a"));
        let mut b = hub.join(PeerId::from("b"));

        a.broadcast(json!({ "kind": "dead", "id": "a" })).unwrap();

        assert!(matches!(a.try_recv(), Some(ChannelEvent::Message(_))));
        assert!(matches!(b.try_recv(), Some(ChannelEvent::Message(_))));
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn hub_presence_is_replace_all_and_sorted() {
        let hub = MemoryHub::new();
        let mut b = hub.join(PeerId::from("b"));
        let mut a = hub.join(PeerId::from("a"));
        b.track(&PresenceRecord::new(PeerId::from("b"))).unwrap();
        a.track(&PresenceRecord::new(PeerId::from("a"))).unwrap();

        let mut last = None;
        while let Some(event) = b.try_recv() {
            if let ChannelEvent::Presence(players) = event {
                last = Some(players);
            }
        }
        let ids: Vec<_> = last.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PeerId::from("a"), PeerId::from("b")]);

        a.close();
        a.close();
        assert_eq!(hub.member_count(), 1);
    }

    #[test]
    fn muted_member_broadcasts_are_lost() {
        let hub = MemoryHub::new();
        let mut a = hub.join(PeerId::from("a"));
        let mut b = hub.join(PeerId::from("b"));
        hub.set_muted(&PeerId::from("a"), true);

        a.broadcast(json!({ "kind": "dead", "id": "a" })).unwrap();
        assert!(b.try_recv().is_none());

        hub.set_muted(&PeerId::from("a"), false);
        a.broadcast(json!({ "kind": "dead", "id": "a" })).unwrap();
        assert!(b.try_recv().is_some());
    }

    #[test]
    fn closed_hub_channel_rejects_sends() {
        let hub = MemoryHub::new();
        let mut a = hub.join(PeerId::from("a"));
        a.close();
        assert!(matches!(
            a.broadcast(json!({})),
            Err(TransportError::Closed)
        ));
        assert!(a.try_recv().is_none());
    }
}
