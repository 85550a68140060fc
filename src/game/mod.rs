//! Synchronization core: peers, rounds, hit arbitration and the session loop

pub mod arena;
pub mod combat;
pub mod identity;
pub mod peers;
pub mod round;
pub mod session;
pub mod shell;
pub mod sync;
pub mod timers;
pub mod tuning;

pub use combat::{HitArbiter, HitResolution, HitSource, PendingHit, Projectile};
pub use identity::LocalIdentity;
pub use peers::{Participant, PeerRegistry};
pub use round::{RoundCoordinator, RoundPhase, RoundState};
pub use session::{LocalPlayer, Session, SessionContext};
pub use shell::{HeadlessShell, Overlap, Shell};
