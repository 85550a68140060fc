//! Game session: wires the transport, registry, round and hit arbitration
//! together on a single cooperative loop.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::net::adapter::{NetAdapter, NetEvent};
use crate::net::protocol::{
    ArenaLayout, BroadcastMessage, DeadMsg, PeerId, PresenceSnapshot, RoundMsg, Vec2,
};
use crate::util::time::{unix_millis, Clock};

use super::combat::{HitArbiter, HitResolution, HitSource, Projectile};
use super::identity::LocalIdentity;
use super::peers::{DamageOutcome, ParticipantHint, PeerRegistry};
use super::round::{RoundCoordinator, RoundSignal, RoundState};
use super::shell::{Overlap, Shell};
use super::sync::StateSync;
use super::timers::{TimerEvent, TimerQueue};
use super::tuning::{DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y, MAX_HEALTH, PROJECTILE_LIFESPAN_MS};

/// Dependencies handed to the session at construction
#[derive(Clone)]
pub struct SessionContext {
    pub identity: LocalIdentity,
    pub clock: Arc<dyn Clock>,
}

impl SessionContext {
    pub fn new(identity: LocalIdentity, clock: Arc<dyn Clock>) -> Self {
        Self { identity, clock }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Health bookkeeping for the local participant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPlayer {
    pub health: f32,
    pub alive: bool,
}

impl Default for LocalPlayer {
    fn default() -> Self {
        Self {
            health: MAX_HEALTH,
            alive: true,
        }
    }
}

pub struct Session {
    ctx: SessionContext,
    net: NetAdapter,
    registry: PeerRegistry,
    round: RoundCoordinator,
    combat: HitArbiter,
    sync: StateSync,
    timers: TimerQueue,
    local: LocalPlayer,
}

impl Session {
    pub fn new(ctx: SessionContext, net: NetAdapter, seed: u64) -> Self {
        let id = ctx.identity.id.clone();
        let mut round = RoundCoordinator::new(id.clone(), seed);
        round.update_election(std::iter::empty::<&PeerId>());
        Self {
            registry: PeerRegistry::new(id.clone()),
            combat: HitArbiter::new(id),
            sync: StateSync::new(),
            timers: TimerQueue::new(),
            local: LocalPlayer::default(),
            round,
            ctx,
            net,
        }
    }

    /// Push the initial layout to the shell
    pub fn start<S: Shell>(&mut self, shell: &mut S) {
        shell.apply_layout(self.round.layout());
        if self.net.is_offline() {
            info!(peer_id = %self.local_id(), "Playing offline");
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.ctx.identity.id
    }

    pub fn now(&self) -> u64 {
        self.ctx.now()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.ctx.identity
    }

    pub fn is_offline(&self) -> bool {
        self.net.is_offline()
    }

    pub fn is_coordinator(&self) -> bool {
        self.round.is_coordinator()
    }

    pub fn round_state(&self) -> RoundState {
        self.round.state()
    }

    pub fn layout(&self) -> &ArenaLayout {
        self.round.layout()
    }

    pub fn local_player(&self) -> LocalPlayer {
        self.local
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn combat(&self) -> &HitArbiter {
        &self.combat
    }

    pub fn net(&self) -> &NetAdapter {
        &self.net
    }

    /// Drain the transport and route every inbound event
    pub fn pump<S: Shell>(&mut self, shell: &mut S) {
        for event in self.net.poll() {
            match event {
                NetEvent::Presence(snapshot) => self.on_presence(&snapshot, shell),
                NetEvent::Message(msg) => self.route(msg, shell),
            }
        }
    }

    /// One frame: timers, countdown, interpolation and outbound state
    pub fn tick<S: Shell>(&mut self, shell: &mut S) {
        let now = self.ctx.now();

        for event in self.timers.drain_due(now) {
            match event {
                TimerEvent::HitDeadline(pid) => {
                    if !self.round.is_active() {
                        continue;
                    }
                    if let HitResolution::Apply { target, damage, source } =
                        self.combat.on_deadline(&pid, now)
                    {
                        self.apply_damage(&target, damage, source, shell);
                    }
                }
                TimerEvent::ProjectileExpiry(pid) => {
                    if self.combat.destroy_projectile(&pid) {
                        trace!(pid = %pid, "Projectile expired");
                    }
                    shell.destroy_projectile(&pid);
                }
            }
        }

        for signal in self.round.tick(now) {
            match signal {
                RoundSignal::Banner(text) => shell.show_banner(Some(&text)),
                RoundSignal::Started => shell.show_banner(None),
            }
        }

        let pruned = self.registry.tick(now);
        if !pruned.is_empty() {
            for id in &pruned {
                shell.remove_peer(id);
            }
            self.round.update_election(self.registry.ids());
            self.check_round_end(shell);
        }

        if !self.net.is_offline() {
            let position = shell.local_position();
            if self.sync.due(now, position) {
                let velocity = shell.local_velocity();
                let msg = StateSync::state_msg(self.local_id(), position, velocity, shell.aim());
                self.net.send(&BroadcastMessage::State(msg));
                self.net
                    .update_presence(StateSync::presence_patch(position, velocity));
            }
        }
        self.net.flush();
        self.combat.prune_consumed(now);
    }

    /// Fire with a charge fraction in [0, 1]. Returns the correlation token when a shot left.
    pub fn fire<S: Shell>(&mut self, charge: f32, shell: &mut S) -> Option<String> {
        let now = self.ctx.now();
        let projectile = self.combat.fire(
            shell.local_position(),
            shell.aim(),
            charge,
            now,
            self.round.is_active(),
            self.local.alive,
        )?;

        shell.spawn_projectile(&projectile);
        self.timers.schedule(
            now + PROJECTILE_LIFESPAN_MS,
            TimerEvent::ProjectileExpiry(projectile.pid.clone()),
        );
        let identity = &self.ctx.identity;
        let shot = projectile.shot_msg(&identity.name, &identity.color);
        self.net.send(&BroadcastMessage::Shot(shot));
        Some(projectile.pid)
    }

    /// Feed an overlap reported by the physics shell
    pub fn on_overlap<S: Shell>(&mut self, overlap: Overlap, shell: &mut S) {
        match overlap {
            Overlap::Remote { pid, target } => self.on_remote_overlap(&pid, &target, shell),
            Overlap::Local { pid } => self.on_local_overlap(&pid, shell),
            Overlap::World { pid } => {
                self.combat.destroy_projectile(&pid);
                shell.destroy_projectile(&pid);
            }
        }
    }

    /// Attacker path
    fn on_remote_overlap<S: Shell>(&mut self, pid: &str, target: &PeerId, shell: &mut S) {
        if !self.registry.get(target).is_some_and(|p| p.alive) {
            return;
        }
        let now = self.ctx.now();
        let hit = self
            .combat
            .on_remote_overlap(pid, target, now, self.round.is_active());
        shell.destroy_projectile(pid);

        if let Some(hit) = hit {
            let damage = hit.dmg;
            self.net.send(&BroadcastMessage::Hit(hit));
            self.apply_damage(target, damage, HitSource::Authoritative, shell);
        }
    }

    /// Victim path: defer, never apply
    fn on_local_overlap<S: Shell>(&mut self, pid: &str, shell: &mut S) {
        if !self.local.alive {
            return;
        }
        let now = self.ctx.now();
        let deadline = self
            .combat
            .on_local_overlap(pid, now, self.round.is_active());
        shell.destroy_projectile(pid);

        if let Some(deadline) = deadline {
            shell.play_hit_flash(&self.ctx.identity.id);
            self.timers
                .schedule(deadline, TimerEvent::HitDeadline(pid.to_string()));
        }
    }

    fn on_presence<S: Shell>(&mut self, snapshot: &PresenceSnapshot, shell: &mut S) {
        let now = self.ctx.now();
        let outcome = self.registry.reconcile(snapshot, now);
        for id in &outcome.removed {
            shell.remove_peer(id);
        }

        let handoff = self.round.update_election(self.registry.ids());
        if handoff || !outcome.removed.is_empty() {
            self.check_round_end(shell);
        }
    }

    fn route<S: Shell>(&mut self, msg: BroadcastMessage, shell: &mut S) {
        let Some(sender) = msg.sender().cloned() else {
            return;
        };
        if sender == *self.local_id() {
            trace!(kind = msg.kind(), "Ignoring loopback message");
            return;
        }
        let now = self.ctx.now();
        self.registry.touch(&sender, now);

        match msg {
            BroadcastMessage::State(state) => {
                if !self.registry.contains(&state.id) {
                    let mut hint = self
                        .net
                        .presence(&state.id)
                        .map(ParticipantHint::from)
                        .unwrap_or_default();
                    hint.position = Some(Vec2::new(state.x, state.y));
                    self.registry.ensure(&state.id, hint, now);
                }
                self.registry.apply_state(&state, now);
            }
            BroadcastMessage::Shot(shot) => {
                let hint = ParticipantHint {
                    name: shot.name.clone(),
                    color: shot.color.clone(),
                    position: Some(Vec2::new(shot.x, shot.y)),
                };
                self.registry.ensure(&shot.id, hint, now);
                if let Some(projectile) = self.combat.register_remote_shot(&shot, now) {
                    shell.spawn_projectile(projectile);
                    self.timers.schedule(
                        now + PROJECTILE_LIFESPAN_MS,
                        TimerEvent::ProjectileExpiry(projectile.pid.clone()),
                    );
                }
            }
            BroadcastMessage::Hit(hit) => {
                if !self.round.is_active() {
                    debug!(from = %hit.from, "Ignoring hit while round is inactive");
                    return;
                }
                if let HitResolution::Apply { target, damage, source } =
                    self.combat.on_hit_message(&hit, now)
                {
                    if let Some(pid) = hit.pid.as_deref() {
                        shell.destroy_projectile(pid);
                    }
                    self.apply_damage(&target, damage, source, shell);
                }
            }
            BroadcastMessage::Dead(dead) => {
                // Deaths only happen in an active round; anything else is left over from the last one
                if !self.round.is_active() {
                    debug!(peer_id = %dead.id, "Ignoring death while round is inactive");
                    return;
                }
                if self.registry.mark_dead(&dead.id, now) {
                    self.check_round_end(shell);
                }
            }
            BroadcastMessage::Round(round) => {
                if !self.round.is_fresh(&round) {
                    debug!(from = %round.from, round = round.round, "Ignoring stale round");
                    return;
                }
                self.apply_round(&round, shell);
            }
            BroadcastMessage::Ignored => {}
        }
    }

    fn apply_damage<S: Shell>(&mut self, target: &PeerId, damage: f32, source: HitSource, shell: &mut S) {
        if target == self.local_id() {
            if !self.local.alive {
                return;
            }
            self.local.health = (self.local.health - damage).clamp(0.0, MAX_HEALTH);
            info!(
                damage,
                health = self.local.health,
                source = ?source,
                "Local participant hit"
            );
            shell.play_hit_flash(target);
            if self.local.health <= 0.0 {
                self.die(shell);
            }
            return;
        }

        match self.registry.apply_damage(target, damage) {
            DamageOutcome::Killed => {
                info!(peer_id = %target, "Peer killed");
                self.check_round_end(shell);
            }
            DamageOutcome::Damaged { .. } => shell.play_hit_flash(target),
            DamageOutcome::Ignored => {}
        }
    }

    /// Alive to dead transition for the local participant, once per life
    fn die<S: Shell>(&mut self, shell: &mut S) {
        if !self.local.alive {
            return;
        }
        self.local.alive = false;
        info!(peer_id = %self.local_id(), "Local participant died");
        self.net.send(&BroadcastMessage::Dead(DeadMsg {
            id: self.local_id().clone(),
            ts: unix_millis(),
        }));
        self.check_round_end(shell);
    }

    fn check_round_end<S: Shell>(&mut self, shell: &mut S) {
        let mut alive = self.registry.alive_ids();
        let mut participants: Vec<PeerId> = self.registry.ids().cloned().collect();
        if self.local.alive {
            alive.push(self.local_id().clone());
        }
        participants.push(self.local_id().clone());
        participants.sort();

        if let Some(msg) = self.round.evaluate(&alive, &participants) {
            self.net.send(&BroadcastMessage::Round(msg.clone()));
            self.apply_round(&msg, shell);
        }
    }

    /// Reset everything for the round described by `msg`
    fn apply_round<S: Shell>(&mut self, msg: &RoundMsg, shell: &mut S) {
        let now = self.ctx.now();
        let winner_name = msg.winner_id.as_ref().and_then(|id| {
            self.registry
                .get(id)
                .map(|p| p.name.clone())
                .or_else(|| self.net.presence(id).and_then(|p| p.name.clone()))
        });
        let banner = self.round.apply_round(msg, winner_name.as_deref(), now);
        shell.apply_layout(self.round.layout());

        self.local = LocalPlayer::default();
        let spawn = msg
            .spawns
            .get(self.local_id())
            .copied()
            .unwrap_or(Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y));
        shell.set_position(spawn);
        shell.set_velocity(Vec2::ZERO);

        self.registry.reset_for_round(&msg.spawns);
        self.combat.clear_for_round();
        shell.clear_projectiles();
        shell.show_banner(Some(&banner));
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &Projectile> {
        self.combat.projectiles()
    }

    /// Leave the room
    pub fn shutdown(&mut self) {
        self.net.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::channel::{MemoryHub, OfflineChannel};
    use crate::net::protocol::{HitMsg, PresenceRecord, ShotMsg, StateMsg};
    use crate::game::shell::HeadlessShell;
    use crate::util::time::ManualClock;
    use assert_approx_eq::assert_approx_eq;

    fn session_on(hub: &MemoryHub, id: &str, clock: &ManualClock) -> Session {
        let identity = LocalIdentity::with_id(PeerId::from(id), Some(id));
        let presence = identity.presence(Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y));
        let net = NetAdapter::with_channel(Box::new(hub.join(identity.id.clone())), presence);
        Session::new(SessionContext::new(identity, Arc::new(clock.clone())), net, 1)
    }

    fn shot_from(owner: &str, pid: &str, dmg: f32) -> BroadcastMessage {
        BroadcastMessage::Shot(ShotMsg {
            id: PeerId::from(owner),
            name: Some(owner.to_string()),
            color: None,
            pid: Some(pid.to_string()),
            x: 0.0,
            y: 0.0,
            dx: 1.0,
            dy: 0.0,
            spd: 500.0,
            dmg: Some(dmg),
            ts: 0,
        })
    }

    fn hit_from(from: &str, pid: &str, target: &str, dmg: f32) -> BroadcastMessage {
        BroadcastMessage::Hit(HitMsg {
            from: PeerId::from(from),
            pid: Some(pid.to_string()),
            target_id: PeerId::from(target),
            dmg,
            ts: 0,
        })
    }

    #[test]
    fn offline_session_plays_alone() {
        let clock = ManualClock::new(0);
        let identity = LocalIdentity::with_id(PeerId::from("solo"), None);
        let presence = identity.presence(Vec2::ZERO);
        let net = NetAdapter::with_channel(Box::new(OfflineChannel::new(presence.clone())), presence);
        let mut session = Session::new(SessionContext::new(identity, Arc::new(clock.clone())), net, 1);
        let mut shell = HeadlessShell::new();

        session.start(&mut shell);
        session.pump(&mut shell);
        assert!(session.is_offline());
        assert!(session.is_coordinator());
        assert!(session.registry().is_empty());
        assert!(session.round_state().active);

        clock.advance(16);
        session.tick(&mut shell);
        assert!(session.fire(1.0, &mut shell).is_some());
        assert_eq!(session.net().stats().sent, 0);
    }

    #[test]
    fn loopback_round_is_ignored() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut a = session_on(&hub, "a", &clock);
        let mut shell = HeadlessShell::new();

        let own = RoundMsg {
            from: PeerId::from("a"),
            round: 2,
            winner_id: None,
            layout: vec![],
            spawns: Default::default(),
            ts: 0,
        };
        a.route(BroadcastMessage::Round(own), &mut shell);
        assert_eq!(a.round_state().round_number, 1);
        assert!(a.round_state().active);
    }

    #[test]
    fn state_before_presence_creates_peer_with_position() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut a = session_on(&hub, "a", &clock);
        let mut shell = HeadlessShell::new();

        a.route(
            BroadcastMessage::State(StateMsg {
                id: PeerId::from("z"),
                x: 10.0,
                y: 20.0,
                vx: 0.0,
                vy: 0.0,
                aim: Vec2::ZERO,
                ts: 0,
            }),
            &mut shell,
        );
        let z = a.registry().get(&PeerId::from("z")).unwrap();
        assert_eq!(z.position, Vec2::new(10.0, 20.0));
    }

    #[test]
    fn victim_fallback_then_late_authoritative_applies_once() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(1_000);
        let mut v = session_on(&hub, "v", &clock);
        let mut shell = HeadlessShell::new();

        v.route(shot_from("a", "x", 25.0), &mut shell);
        v.on_overlap(Overlap::Local { pid: "x".into() }, &mut shell);
        assert_approx_eq!(v.local_player().health, MAX_HEALTH);

        clock.advance(180);
        v.tick(&mut shell);
        assert_approx_eq!(v.local_player().health, 75.0);

        clock.advance(300);
        v.route(hit_from("a", "x", "v", 25.0), &mut shell);
        v.tick(&mut shell);
        assert_approx_eq!(v.local_player().health, 75.0);
    }

    #[test]
    fn authoritative_hit_applies_declared_damage_once() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut v = session_on(&hub, "v", &clock);
        let mut shell = HeadlessShell::new();

        v.route(shot_from("a", "x", 25.0), &mut shell);
        v.on_overlap(Overlap::Local { pid: "x".into() }, &mut shell);
        v.route(hit_from("a", "x", "v", 30.0), &mut shell);
        v.route(hit_from("a", "x", "v", 30.0), &mut shell);
        clock.advance(500);
        v.tick(&mut shell);
        assert_approx_eq!(v.local_player().health, 70.0);
    }

    #[test]
    fn lethal_hit_kills_once_and_solo_coordinator_calls_draw() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut v = session_on(&hub, "v", &clock);
        let mut shell = HeadlessShell::new();

        v.route(hit_from("a", "p1", "v", 60.0), &mut shell);
        v.route(hit_from("a", "p2", "v", 60.0), &mut shell);
        // "v" is alone in presence and therefore coordinator: zero alive is a draw
        let state = v.round_state();
        assert_eq!(state.round_number, 2);
        assert_eq!(state.last_winner_id, None);
        assert!(!state.active);
        assert_eq!(shell.banner.as_deref(), Some("DRAW"));
        assert!(v.local_player().alive);
        assert_approx_eq!(v.local_player().health, MAX_HEALTH);

        // Combat is inactive during the countdown
        v.route(hit_from("a", "p3", "v", 60.0), &mut shell);
        assert_approx_eq!(v.local_player().health, MAX_HEALTH);
    }

    #[test]
    fn duplicated_round_is_applied_once() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut b = session_on(&hub, "b", &clock);
        let mut shell = HeadlessShell::new();

        let round = BroadcastMessage::Round(RoundMsg {
            from: PeerId::from("a"),
            round: 2,
            winner_id: Some(PeerId::from("a")),
            layout: vec![],
            spawns: [(PeerId::from("b"), Vec2::new(300.0, 400.0))].into_iter().collect(),
            ts: 42,
        });
        b.route(round.clone(), &mut shell);
        clock.advance(5_000);
        b.tick(&mut shell);
        assert!(b.round_state().active);

        b.route(hit_from("a", "x", "b", 30.0), &mut shell);
        shell.position = Vec2::new(900.0, 100.0);
        assert_approx_eq!(b.local_player().health, 70.0);

        b.route(round, &mut shell);
        let state = b.round_state();
        assert_eq!(state.round_number, 2);
        assert!(state.active);
        assert_approx_eq!(b.local_player().health, 70.0);
        assert_eq!(shell.position, Vec2::new(900.0, 100.0));
    }

    #[test]
    fn presence_departure_ends_round_for_last_survivor() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(0);
        let mut a = session_on(&hub, "a", &clock);
        let mut shell = HeadlessShell::new();

        let snapshot = vec![
            PresenceRecord::new(PeerId::from("a")),
            PresenceRecord::new(PeerId::from("b")),
        ];
        a.on_presence(&snapshot, &mut shell);
        assert!(a.is_coordinator());
        assert!(a.round_state().active);

        a.on_presence(&snapshot[..1].to_vec(), &mut shell);
        assert_eq!(a.round_state().last_winner_id, Some(PeerId::from("a")));
        assert_eq!(shell.banner.as_deref(), Some("YOU WINS"));
    }
}
