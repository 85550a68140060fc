//! Wander-and-shoot driver for the headless peer

use std::cmp::Ordering;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::shell::HeadlessShell;
use crate::game::tuning::{WORLD_HEIGHT, WORLD_WIDTH};
use crate::game::Session;
use crate::net::protocol::Vec2;

const BOT_SPEED: f32 = 220.0;
const ENGAGE_RANGE: f32 = 700.0;
const FIRE_CHANCE: f64 = 0.05;

pub struct Bot {
    rng: ChaCha8Rng,
    wander_target: Vec2,
    next_decision_at: u64,
}

impl Bot {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            wander_target: Vec2::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0),
            next_decision_at: 0,
        }
    }

    /// Steer, aim at the nearest live peer and occasionally fire
    pub fn drive(&mut self, session: &mut Session, shell: &mut HeadlessShell) {
        if !session.local_player().alive || !session.round_state().active {
            shell.velocity = Vec2::ZERO;
            return;
        }

        let now = session.now();
        if now >= self.next_decision_at {
            self.wander_target = Vec2::new(
                self.rng.gen_range(40.0..WORLD_WIDTH - 40.0),
                self.rng.gen_range(200.0..WORLD_HEIGHT - 60.0),
            );
            self.next_decision_at = now + self.rng.gen_range(1_500..3_000);
        }
        shell.velocity = (self.wander_target - shell.position).normalize_or_zero() * BOT_SPEED;

        let position = shell.position;
        let nearest = session
            .registry()
            .iter()
            .filter(|p| p.alive)
            .map(|p| (p.position, p.position.distance_squared(position)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        if let Some((target, distance_sq)) = nearest {
            let aim = (target - position).normalize_or_zero();
            if aim != Vec2::ZERO {
                shell.aim = aim;
            }
            if distance_sq < ENGAGE_RANGE * ENGAGE_RANGE && self.rng.gen_bool(FIRE_CHANCE) {
                let charge = self.rng.gen::<f32>();
                session.fire(charge, shell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::game::{LocalIdentity, SessionContext};
    use crate::net::channel::OfflineChannel;
    use crate::net::NetAdapter;
    use crate::util::time::ManualClock;

    #[test]
    fn bot_wanders_when_alone() {
        let identity = LocalIdentity::with_id("bot".into(), Some("bot"));
        let presence = identity.presence(Vec2::ZERO);
        let net = NetAdapter::with_channel(Box::new(OfflineChannel::new(presence.clone())), presence);
        let clock = ManualClock::new(0);
        let mut session = Session::new(SessionContext::new(identity, Arc::new(clock)), net, 3);
        let mut shell = HeadlessShell::new();

        let mut bot = Bot::new(9);
        bot.drive(&mut session, &mut shell);
        assert!(shell.velocity.length_squared() > 0.0);
        assert_eq!(session.projectiles().count(), 0);
    }
}
