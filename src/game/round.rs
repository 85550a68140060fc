//! Round lifecycle: coordinator election, end-of-round detection and countdown

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

use tracing::{debug, info};

use crate::net::protocol::{ArenaLayout, PeerId, RoundMsg};
use crate::util::time::unix_millis;

use super::arena::{assign_spawns, default_layout, generate_layout};

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Combat resolves
    Active,
    /// Result locked, winner banner showing
    Ending,
    /// Timed 3/2/1/GO sequence, no combat
    Countdown,
}

/// Steps of the post-round sequence, each shown for a fixed duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    WinnerBanner,
    Three,
    Two,
    One,
    Go,
    Done,
}

impl CountdownStep {
    pub fn duration_ms(self, draw: bool) -> u64 {
        match self {
            CountdownStep::WinnerBanner if draw => 800,
            CountdownStep::WinnerBanner => 1_000,
            CountdownStep::Three | CountdownStep::Two => 1_000,
            CountdownStep::One => 700,
            CountdownStep::Go => 500,
            CountdownStep::Done => 0,
        }
    }

    fn next(self) -> Self {
        match self {
            CountdownStep::WinnerBanner => CountdownStep::Three,
            CountdownStep::Three => CountdownStep::Two,
            CountdownStep::Two => CountdownStep::One,
            CountdownStep::One => CountdownStep::Go,
            CountdownStep::Go | CountdownStep::Done => CountdownStep::Done,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CountdownStep::Three => "3",
            CountdownStep::Two => "2",
            CountdownStep::One => "1",
            CountdownStep::Go => "GO!",
            CountdownStep::WinnerBanner | CountdownStep::Done => "",
        }
    }
}

/// Banner or activation change produced by the countdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundSignal {
    Banner(String),
    /// Countdown complete, round is active again
    Started,
}

/// Read-only view of the round for the UI shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundState {
    pub active: bool,
    pub round_number: u32,
    pub last_winner_id: Option<PeerId>,
}

#[derive(Debug, Clone)]
struct Countdown {
    step: CountdownStep,
    step_started_at: u64,
    draw: bool,
}

/// Lexicographically smallest id
pub fn elect<'a, I>(ids: I) -> Option<&'a PeerId>
where
    I: IntoIterator<Item = &'a PeerId>,
{
    ids.into_iter().min()
}

/// Banner shown when a round ends
pub fn banner_text(winner_id: Option<&PeerId>, local_id: &PeerId, winner_name: Option<&str>) -> String {
    match winner_id {
        None => "DRAW".to_string(),
        Some(id) if id == local_id => "YOU WINS".to_string(),
        Some(_) => {
            let who = winner_name
                .filter(|n| !n.is_empty())
                .map(str::to_uppercase)
                .unwrap_or_else(|| "PLAYER".to_string());
            format!("{} WINS", who)
        }
    }
}

pub struct RoundCoordinator {
    local_id: PeerId,
    coordinator: Option<PeerId>,
    phase: RoundPhase,
    countdown: Option<Countdown>,
    round_number: u32,
    last_winner_id: Option<PeerId>,
    /// Sender and timestamp of the last applied round message
    last_applied: Option<(PeerId, u64)>,
    layout: ArenaLayout,
    rng: ChaCha8Rng,
}

impl RoundCoordinator {
    pub fn new(local_id: PeerId, seed: u64) -> Self {
        Self {
            local_id,
            coordinator: None,
            phase: RoundPhase::Active,
            countdown: None,
            round_number: 1,
            last_winner_id: None,
            last_applied: None,
            layout: default_layout(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Combat resolves only while active
    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    pub fn state(&self) -> RoundState {
        RoundState {
            active: self.is_active(),
            round_number: self.round_number,
            last_winner_id: self.last_winner_id.clone(),
        }
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    pub fn coordinator(&self) -> Option<&PeerId> {
        self.coordinator.as_ref()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator.as_ref() == Some(&self.local_id)
    }

    /// Recompute the coordinator over the remote ids plus the local id.
    ///
    /// Returns true when the role was handed to the local peer from someone
    /// else while the round is active, in which case the caller must run
    /// the end-of-round evaluation.
    pub fn update_election<'a, I>(&mut self, remote_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a PeerId>,
    {
        let elected = match elect(remote_ids) {
            Some(remote) if *remote < self.local_id => remote.clone(),
            _ => self.local_id.clone(),
        };
        if self.coordinator.as_ref() == Some(&elected) {
            return false;
        }

        let previous = self.coordinator.replace(elected);
        let is_local = self.is_coordinator();
        info!(
            coordinator = ?self.coordinator,
            previous = ?previous,
            local = is_local,
            "Coordinator elected"
        );
        previous.is_some() && is_local && self.is_active()
    }

    /// End-of-round detection, coordinator only and only while active.
    ///
    /// `alive` holds every alive participant (local included), `participants`
    /// every known id. Returns the round message to broadcast and apply.
    pub fn evaluate(&mut self, alive: &[PeerId], participants: &[PeerId]) -> Option<RoundMsg> {
        if !self.is_coordinator() || !self.is_active() {
            return None;
        }
        if alive.len() > 1 {
            return None;
        }

        let winner_id = alive.first().cloned();
        self.phase = RoundPhase::Ending;

        let layout = generate_layout(&mut self.rng);
        let spawns = assign_spawns(&layout, participants);
        info!(
            round = self.round_number,
            winner = ?winner_id,
            participants = participants.len(),
            "Round ended"
        );

        Some(RoundMsg {
            from: self.local_id.clone(),
            round: self.round_number + 1,
            winner_id,
            layout,
            spawns,
            ts: unix_millis(),
        })
    }

    /// Whether a received round message is newer than the one in effect.
    ///
    /// Duplicates and older rounds are stale. A rival message for the current round
    /// only wins during the countdown and only from a smaller coordinator id, so every
    /// peer settles on the same transition.
    pub fn is_fresh(&self, msg: &RoundMsg) -> bool {
        if let Some((from, ts)) = &self.last_applied {
            if *from == msg.from && *ts == msg.ts {
                return false;
            }
        }
        if msg.round == 0 {
            return true;
        }
        match msg.round.cmp(&self.round_number) {
            Ordering::Greater => true,
            Ordering::Equal => {
                !self.is_active()
                    && self
                        .last_applied
                        .as_ref()
                        .is_some_and(|(from, _)| msg.from < *from)
            }
            Ordering::Less => false,
        }
    }

    /// Enter the post-round sequence for `msg`. A round arriving mid-countdown restarts it.
    pub fn apply_round(&mut self, msg: &RoundMsg, winner_name: Option<&str>, now: u64) -> String {
        if !msg.layout.is_empty() {
            self.layout = msg.layout.clone();
        } else {
            debug!("Round message without layout, keeping current");
        }

        self.round_number = if msg.round > 0 {
            msg.round
        } else {
            self.round_number + 1
        };
        self.last_winner_id = msg.winner_id.clone();
        self.last_applied = Some((msg.from.clone(), msg.ts));
        self.phase = RoundPhase::Ending;
        self.countdown = Some(Countdown {
            step: CountdownStep::WinnerBanner,
            step_started_at: now,
            draw: msg.winner_id.is_none(),
        });

        info!(round = self.round_number, from = %msg.from, "Round applied");
        banner_text(msg.winner_id.as_ref(), &self.local_id, winner_name)
    }

    /// Advance the countdown. Late ticks may pass through several steps.
    pub fn tick(&mut self, now: u64) -> Vec<RoundSignal> {
        let mut signals = Vec::new();
        let mut finished = false;

        if let Some(countdown) = self.countdown.as_mut() {
            loop {
                let duration = countdown.step.duration_ms(countdown.draw);
                if now.saturating_sub(countdown.step_started_at) < duration {
                    break;
                }
                countdown.step_started_at += duration;
                countdown.step = countdown.step.next();
                if countdown.step == CountdownStep::Done {
                    finished = true;
                    break;
                }
                self.phase = RoundPhase::Countdown;
                signals.push(RoundSignal::Banner(countdown.step.label().to_string()));
            }
        }

        if finished {
            self.countdown = None;
            self.phase = RoundPhase::Active;
            signals.push(RoundSignal::Started);
            info!(round = self.round_number, "Countdown finished");
        }
        signals
    }
}
