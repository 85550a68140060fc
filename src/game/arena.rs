//! Arena layout generation and spawn assignment

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::net::protocol::{ArenaLayout, PeerId, Platform, SpawnAssignment, Vec2};

use super::tuning::{DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y, WORLD_HEIGHT, WORLD_WIDTH};

const GROUND_HEIGHT: f32 = 40.0;
const ROWS: usize = 4;
const FIRST_ROW_Y: f32 = WORLD_HEIGHT - 160.0;
const ROW_SPACING: f32 = 120.0;
const PLATFORM_HEIGHT: f32 = 16.0;
const SPAWN_LIFT: f32 = 30.0;

/// Layout used before the first coordinated round
pub fn default_layout() -> ArenaLayout {
    vec![
        ground(),
        Platform { x: 400.0, y: 740.0, width: 260.0, height: PLATFORM_HEIGHT },
        Platform { x: 1200.0, y: 740.0, width: 260.0, height: PLATFORM_HEIGHT },
        Platform { x: 800.0, y: 620.0, width: 300.0, height: PLATFORM_HEIGHT },
        Platform { x: 300.0, y: 500.0, width: 220.0, height: PLATFORM_HEIGHT },
        Platform { x: 1300.0, y: 500.0, width: 220.0, height: PLATFORM_HEIGHT },
    ]
}

fn ground() -> Platform {
    Platform {
        x: WORLD_WIDTH / 2.0,
        y: WORLD_HEIGHT - GROUND_HEIGHT,
        width: WORLD_WIDTH,
        height: GROUND_HEIGHT,
    }
}

/// Full-width ground followed by rows of shorter platforms at descending heights
pub fn generate_layout<R: Rng + ?Sized>(rng: &mut R) -> ArenaLayout {
    let mut layout = vec![ground()];
    for row in 0..ROWS {
        let y = FIRST_ROW_Y - row as f32 * ROW_SPACING;
        let count = rng.gen_range(2..=3);
        for _ in 0..count {
            layout.push(Platform {
                x: rng.gen_range(100.0..WORLD_WIDTH - 100.0),
                y,
                width: rng.gen_range(180..320) as f32,
                height: PLATFORM_HEIGHT,
            });
        }
    }
    layout
}

/// FNV-1a over the platform coordinates
fn layout_seed(layout: &[Platform]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for p in layout {
        for v in [p.x, p.y, p.width, p.height] {
            for byte in v.to_bits().to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
    }
    hash
}

/// Spawn point per id, indexed by the sorted id list.
///
/// Randomness is seeded from the layout, so every peer holding the same
/// layout and id set computes the same mapping.
pub fn assign_spawns(layout: &[Platform], ids: &[PeerId]) -> SpawnAssignment {
    let mut sorted: Vec<&PeerId> = ids.iter().collect();
    sorted.sort();
    sorted.dedup();

    let elevated: Vec<&Platform> = layout
        .iter()
        .filter(|p| p.y < WORLD_HEIGHT - 80.0)
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(layout_seed(layout));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            let platform = if elevated.is_empty() {
                layout.first()
            } else {
                let offset = rng.gen_range(0..elevated.len());
                elevated.get((i + offset) % elevated.len()).copied()
            };
            let spawn = match platform {
                Some(p) => spawn_on(p, &mut rng),
                None => Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y),
            };
            (id.clone(), spawn)
        })
        .collect()
}

fn spawn_on<R: Rng + ?Sized>(p: &Platform, rng: &mut R) -> Vec2 {
    let margin = (p.width * 0.2).clamp(20.0, 60.0);
    let span = (p.width - margin * 2.0).max(0.0);
    let x = p.x - p.width / 2.0 + margin + rng.gen::<f32>() * span;
    let y = p.y - SPAWN_LIFT;
    Vec2::new(
        x.clamp(20.0, WORLD_WIDTH - 20.0),
        y.clamp(20.0, WORLD_HEIGHT - 60.0),
    )
}
