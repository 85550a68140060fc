//! Headless peer: runs a session against the configured room on a fixed tick

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::config::Config;
use crate::game::{HeadlessShell, LocalIdentity, Session, SessionContext};
use crate::net::NetAdapter;
use crate::util::time::{tick_duration, SystemClock};

use super::bot::Bot;
use super::shutdown_signal;

/// Run until Ctrl+C / SIGTERM, then leave the room
pub async fn run_peer(config: Config) -> anyhow::Result<()> {
    let identity = LocalIdentity::generate(config.player_name.as_deref());
    info!(
        peer_id = %identity.id,
        name = %identity.name,
        room = %config.room,
        offline = config.is_offline(),
        "Starting peer"
    );

    let mut shell = HeadlessShell::new();
    let net = NetAdapter::connect(&config, identity.presence(shell.position)).await;
    let ctx = SessionContext::new(identity, Arc::new(SystemClock::new()));
    let mut session = Session::new(ctx, net, rand::random());
    session.start(&mut shell);

    let mut bot = Bot::new(rand::random());
    let period = tick_duration(config.tick_hz);
    let dt = period.as_secs_f32();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.pump(&mut shell);
                bot.drive(&mut session, &mut shell);
                shell.step(dt);

                let overlaps = shell.overlaps(
                    session.local_id(),
                    session.local_player().alive,
                    session.registry().iter(),
                );
                for overlap in overlaps {
                    session.on_overlap(overlap, &mut shell);
                }
                session.tick(&mut shell);
            }
            _ = &mut shutdown => break,
        }
    }

    let stats = session.net().stats();
    info!(
        sent = stats.sent,
        throttled = stats.throttled,
        received = stats.received,
        rounds = session.round_state().round_number,
        "Peer shutting down"
    );
    session.shutdown();
    Ok(())
}
