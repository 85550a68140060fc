//! Transport adapter: rate-limited broadcast, coalesced presence, offline fallback

use std::collections::HashMap;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::util::rate_limit::OutboundLimiter;

use super::channel::{Channel, ChannelEvent, OfflineChannel, UdpChannel};
use super::protocol::{BroadcastMessage, PeerId, PresencePatch, PresenceRecord, PresenceSnapshot};

/// Inbound event handed to the session loop
#[derive(Debug, Clone)]
pub enum NetEvent {
    Presence(PresenceSnapshot),
    Message(BroadcastMessage),
}

/// Traffic counters, for logging and tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStats {
    pub sent: u64,
    pub throttled: u64,
    pub presence_tracked: u64,
    pub received: u64,
    pub errors: u64,
}

/// Owns the channel, the outbound limiter and the retained local presence record
pub struct NetAdapter {
    channel: Box<dyn Channel>,
    limiter: OutboundLimiter,
    presence: PresenceRecord,
    presence_dirty: bool,
    known: HashMap<PeerId, PresenceRecord>,
    stats: AdapterStats,
    connected: bool,
}

impl NetAdapter {
    /// Connect to the configured room. Missing credentials or a failed connect yield offline mode.
    pub async fn connect(config: &Config, local: PresenceRecord) -> Self {
        let Some(credentials) = config.credentials.as_ref() else {
            warn!("No transport credentials configured; running offline");
            return Self::with_channel(Box::new(OfflineChannel::new(local.clone())), local);
        };

        match UdpChannel::connect(credentials, &config.room, local.clone()).await {
            Ok(channel) => Self::with_channel(Box::new(channel), local),
            Err(e) => {
                warn!(error = %e, "Relay connect failed; running offline");
                Self::with_channel(Box::new(OfflineChannel::new(local.clone())), local)
            }
        }
    }

    /// Wrap an already-open channel and announce the initial presence record
    pub fn with_channel(channel: Box<dyn Channel>, local: PresenceRecord) -> Self {
        let mut adapter = Self {
            channel,
            limiter: OutboundLimiter::new(),
            presence: local,
            presence_dirty: true,
            known: HashMap::new(),
            stats: AdapterStats::default(),
            connected: true,
        };
        adapter.flush();
        adapter
    }

    pub fn is_offline(&self) -> bool {
        self.channel.is_offline()
    }

    pub fn local_id(&self) -> &PeerId {
        &self.presence.id
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats
    }

    /// Latest presence record seen for `id`
    pub fn presence(&self, id: &PeerId) -> Option<&PresenceRecord> {
        self.known.get(id)
    }

    /// Retained local presence record
    pub fn local_presence(&self) -> &PresenceRecord {
        &self.presence
    }

    /// Broadcast a message. Non-critical kinds are subject to the soft rate limit.
    /// Returns whether the message was handed to the channel.
    pub fn send(&mut self, msg: &BroadcastMessage) -> bool {
        if !self.connected || self.is_offline() {
            return false;
        }
        if !msg.is_critical() && !self.limiter.check_broadcast() {
            self.stats.throttled += 1;
            trace!(kind = msg.kind(), "Outbound message throttled");
            return false;
        }

        let payload = match serde_json::to_value(msg) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.errors += 1;
                debug!(error = %e, kind = msg.kind(), "Failed to encode broadcast");
                return false;
            }
        };

        match self.channel.broadcast(payload) {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                self.stats.errors += 1;
                debug!(error = %e, kind = msg.kind(), "Broadcast failed");
                false
            }
        }
    }

    /// Merge a partial presence update and track it when the coalescing limit allows
    pub fn update_presence(&mut self, patch: PresencePatch) {
        self.presence.merge(patch);
        self.presence_dirty = true;
        self.flush();
    }

    /// Track a pending presence update if the limiter has room
    pub fn flush(&mut self) {
        if !self.presence_dirty || !self.connected {
            return;
        }
        if self.is_offline() {
            self.presence_dirty = false;
            return;
        }
        if !self.limiter.check_presence() {
            return;
        }

        self.presence_dirty = false;
        match self.channel.track(&self.presence) {
            Ok(()) => self.stats.presence_tracked += 1,
            Err(e) => {
                self.stats.errors += 1;
                debug!(error = %e, "Presence track failed");
            }
        }
    }

    /// Drain every pending inbound event
    pub fn poll(&mut self) -> Vec<NetEvent> {
        let mut events = Vec::new();
        if !self.connected {
            return events;
        }

        while let Some(event) = self.channel.try_recv() {
            self.stats.received += 1;
            match event {
                ChannelEvent::Presence(players) => {
                    self.known = players
                        .iter()
                        .map(|p| (p.id.clone(), p.clone()))
                        .collect();
                    events.push(NetEvent::Presence(players));
                }
                ChannelEvent::Message(payload) => match BroadcastMessage::decode(payload) {
                    BroadcastMessage::Ignored => {}
                    msg => events.push(NetEvent::Message(msg)),
                },
            }
        }
        events
    }

    /// Leave the room. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.channel.close();
        info!(peer_id = %self.presence.id, "Transport disconnected");
    }
}

impl Drop for NetAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}
