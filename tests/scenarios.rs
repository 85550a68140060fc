//! Multi-peer scenarios over an in-process hub with a shared manual clock

use std::sync::Arc;
use std::time::Duration;

use assert_approx_eq::assert_approx_eq;

use arena_sync::config::Config;
use arena_sync::game::arena::assign_spawns;
use arena_sync::game::tuning::{DAMAGE_MAX, HIT_DEADLINE_MS, MAX_HEALTH, STALE_AFTER_MS};
use arena_sync::game::{HeadlessShell, LocalIdentity, Overlap, Session, SessionContext};
use arena_sync::net::protocol::{PeerId, Vec2};
use arena_sync::net::{Channel, MemoryHub, NetAdapter};
use arena_sync::util::time::ManualClock;

struct Peer {
    session: Session,
    shell: HeadlessShell,
}

impl Peer {
    fn join(hub: &MemoryHub, id: &str, clock: &ManualClock) -> Self {
        let identity = LocalIdentity::with_id(PeerId::from(id), Some(id));
        let mut shell = HeadlessShell::new();
        let presence = identity.presence(shell.position);
        let net = NetAdapter::with_channel(Box::new(hub.join(identity.id.clone())), presence);
        let mut session = Session::new(SessionContext::new(identity, Arc::new(clock.clone())), net, 7);
        session.start(&mut shell);
        Self { session, shell }
    }

    fn pump(&mut self) {
        self.session.pump(&mut self.shell);
    }

    fn tick(&mut self) {
        self.session.tick(&mut self.shell);
    }

    fn id(&self) -> PeerId {
        self.session.local_id().clone()
    }

    fn health(&self) -> f32 {
        self.session.local_player().health
    }
}

fn pump_all(peers: &mut [&mut Peer]) {
    for peer in peers.iter_mut() {
        peer.pump();
    }
}

/// Attacker fires at full charge and its physics reports the overlap
fn shoot(attacker: &mut Peer, target: &PeerId, clock: &ManualClock) -> String {
    clock.advance(300);
    let pid = attacker
        .session
        .fire(1.0, &mut attacker.shell)
        .expect("shot should leave");
    attacker.session.on_overlap(
        Overlap::Remote {
            pid: pid.clone(),
            target: target.clone(),
        },
        &mut attacker.shell,
    );
    pid
}

#[test]
fn coordinator_declares_winner_and_everyone_respawns() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut a = Peer::join(&hub, "A", &clock);
    let mut b = Peer::join(&hub, "B", &clock);
    let mut c = Peer::join(&hub, "C", &clock);
    pump_all(&mut [&mut a, &mut b, &mut c]);

    assert!(a.session.is_coordinator());
    assert!(!b.session.is_coordinator());
    assert!(!c.session.is_coordinator());
    assert_eq!(a.session.registry().len(), 2);

    // B dies first
    let (b_id, c_id) = (b.id(), c.id());
    for _ in 0..3 {
        shoot(&mut a, &b_id, &clock);
    }
    pump_all(&mut [&mut a, &mut b, &mut c]);
    assert!(!b.session.local_player().alive);
    assert!(a.session.round_state().active);
    assert!(!c.session.registry().get(&b_id).unwrap().alive);

    // Then C; alive count drops to one and A ends the round
    for _ in 0..3 {
        shoot(&mut a, &c_id, &clock);
    }
    let state = a.session.round_state();
    assert_eq!(state.round_number, 2);
    assert_eq!(state.last_winner_id, Some(PeerId::from("A")));
    assert!(!state.active);
    assert_eq!(a.shell.banner.as_deref(), Some("YOU WINS"));

    pump_all(&mut [&mut a, &mut b, &mut c]);
    pump_all(&mut [&mut a, &mut b, &mut c]);

    // Own round broadcast looped back and was ignored
    assert_eq!(a.session.round_state().round_number, 2);

    let ids = [a.id(), b.id(), c.id()];
    let spawns = assign_spawns(a.session.layout(), &ids);
    for peer in [&a, &b, &c] {
        let state = peer.session.round_state();
        assert_eq!(state.round_number, 2);
        assert_eq!(state.last_winner_id, Some(PeerId::from("A")));
        assert!(!state.active);
        assert_eq!(peer.session.layout(), a.session.layout());
        assert_eq!(peer.shell.position, spawns[&peer.id()]);
        assert!(peer.session.local_player().alive);
        assert_approx_eq!(peer.health(), MAX_HEALTH);
    }
    assert_eq!(b.shell.banner.as_deref(), Some("A WINS"));

    // Countdown runs to completion on every peer
    for _ in 0..5 {
        // Let the outbound limiter refill so state heartbeats go out
        std::thread::sleep(Duration::from_millis(70));
        clock.advance(1_000);
        for peer in [&mut a, &mut b, &mut c] {
            peer.tick();
        }
        pump_all(&mut [&mut a, &mut b, &mut c]);
    }
    for peer in [&a, &b, &c] {
        assert!(peer.session.round_state().active);
        assert_eq!(peer.shell.banner, None);
        assert_eq!(peer.session.registry().alive_count(), 2);
    }
}

#[test]
fn late_authoritative_hit_after_fallback_applies_once() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut attacker = Peer::join(&hub, "a", &clock);
    let mut victim = Peer::join(&hub, "v", &clock);
    pump_all(&mut [&mut attacker, &mut victim]);

    let pid = attacker
        .session
        .fire(1.0, &mut attacker.shell)
        .expect("shot should leave");
    victim.pump();
    assert!(victim.session.combat().projectile(&pid).is_some());

    victim
        .session
        .on_overlap(Overlap::Local { pid: pid.clone() }, &mut victim.shell);
    assert_approx_eq!(victim.health(), MAX_HEALTH);

    // Attacker's authoritative hit is in flight but the victim does not drain yet
    attacker.session.on_overlap(
        Overlap::Remote {
            pid: pid.clone(),
            target: victim.id(),
        },
        &mut attacker.shell,
    );

    clock.advance(HIT_DEADLINE_MS);
    victim.tick();
    assert_approx_eq!(victim.health(), MAX_HEALTH - DAMAGE_MAX);

    clock.advance(300);
    victim.pump();
    victim.tick();
    assert_approx_eq!(victim.health(), MAX_HEALTH - DAMAGE_MAX);
    assert!(victim.session.combat().is_consumed(&pid));
}

#[test]
fn lost_authoritative_hit_still_lands_by_deadline() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut attacker = Peer::join(&hub, "a", &clock);
    let mut victim = Peer::join(&hub, "v", &clock);
    pump_all(&mut [&mut attacker, &mut victim]);

    let pid = attacker.session.fire(0.0, &mut attacker.shell).unwrap();
    victim.pump();
    victim
        .session
        .on_overlap(Overlap::Local { pid: pid.clone() }, &mut victim.shell);

    hub.set_muted(&attacker.id(), true);
    attacker.session.on_overlap(
        Overlap::Remote {
            pid,
            target: victim.id(),
        },
        &mut attacker.shell,
    );

    clock.advance(HIT_DEADLINE_MS - 1);
    victim.tick();
    assert_approx_eq!(victim.health(), MAX_HEALTH);

    clock.advance(1);
    victim.pump();
    victim.tick();
    assert_approx_eq!(victim.health(), 85.0);
}

#[test]
fn duplicate_authoritative_hit_is_idempotent() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut attacker = Peer::join(&hub, "a", &clock);
    let mut victim = Peer::join(&hub, "v", &clock);
    pump_all(&mut [&mut attacker, &mut victim]);

    let pid = shoot(&mut attacker, &victim.id(), &clock);
    // Same hit delivered twice by a duplicating transport
    let mut raw = hub.join(PeerId::from("raw"));
    let duplicate = serde_json::json!({
        "kind": "hit",
        "from": "a",
        "pid": pid,
        "targetId": "v",
        "dmg": DAMAGE_MAX,
        "ts": 1,
    });
    raw.broadcast(duplicate).unwrap();

    victim.pump();
    assert_approx_eq!(victim.health(), MAX_HEALTH - DAMAGE_MAX);
    clock.advance(1_000);
    victim.tick();
    assert_approx_eq!(victim.health(), MAX_HEALTH - DAMAGE_MAX);
}

#[test]
fn silent_peer_is_pruned_and_survivor_wins() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut a = Peer::join(&hub, "a", &clock);
    let mut b = Peer::join(&hub, "b", &clock);
    pump_all(&mut [&mut a, &mut b]);
    assert_eq!(a.session.registry().len(), 1);

    clock.advance(STALE_AFTER_MS);
    a.tick();
    assert_eq!(a.session.registry().len(), 1);

    clock.advance(1);
    a.tick();
    assert!(a.session.registry().is_empty());
    assert_eq!(a.session.round_state().last_winner_id, Some(a.id()));
    assert_eq!(a.session.round_state().round_number, 2);
}

#[test]
fn coordinator_departure_hands_off_and_new_coordinator_evaluates() {
    let hub = MemoryHub::new();
    let clock = ManualClock::new(0);
    let mut a = Peer::join(&hub, "a", &clock);
    let mut b = Peer::join(&hub, "b", &clock);
    pump_all(&mut [&mut a, &mut b]);
    assert!(!b.session.is_coordinator());

    a.session.shutdown();
    b.pump();
    assert!(b.session.is_coordinator());
    assert_eq!(b.session.round_state().last_winner_id, Some(b.id()));
    assert_eq!(b.shell.banner.as_deref(), Some("YOU WINS"));
}

#[test]
fn offline_peer_plays_alone_without_broadcasts() {
    let clock = ManualClock::new(0);
    let identity = LocalIdentity::with_id(PeerId::from("solo"), Some("solo"));
    let net = tokio_test::block_on(NetAdapter::connect(
        &Config::offline(),
        identity.presence(Vec2::ZERO),
    ));
    assert!(net.is_offline());

    let mut shell = HeadlessShell::new();
    let mut session = Session::new(SessionContext::new(identity, Arc::new(clock.clone())), net, 1);
    session.start(&mut shell);
    session.pump(&mut shell);
    assert!(session.registry().is_empty());

    for _ in 0..10 {
        clock.advance(100);
        session.fire(0.5, &mut shell);
        session.tick(&mut shell);
    }
    let stats = session.net().stats();
    assert_eq!(stats.sent, 0);
    assert_eq!(stats.presence_tracked, 0);
    assert!(session.round_state().active);
    assert_eq!(session.round_state().round_number, 1);
}
