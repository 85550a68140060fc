//! Render/physics shell seam, plus a headless implementation

use std::collections::HashMap;

use crate::net::protocol::{ArenaLayout, PeerId, Vec2};

use super::combat::Projectile;
use super::peers::Participant;
use super::tuning::{DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y, WORLD_HEIGHT, WORLD_WIDTH};

/// Participant hitbox radius
pub const BODY_RADIUS: f32 = 14.0;

/// Everything the session needs from the render/physics side.
/// Destroying or removing something unknown must be a no-op.
pub trait Shell {
    fn local_position(&self) -> Vec2;
    fn local_velocity(&self) -> Vec2;
    /// Current aim, a unit vector
    fn aim(&self) -> Vec2;

    fn set_position(&mut self, position: Vec2);
    fn set_velocity(&mut self, velocity: Vec2);
    fn play_hit_flash(&mut self, target: &PeerId);

    fn apply_layout(&mut self, layout: &ArenaLayout);
    /// `None` hides the banner
    fn show_banner(&mut self, text: Option<&str>);

    fn spawn_projectile(&mut self, _projectile: &Projectile) {}
    fn destroy_projectile(&mut self, _pid: &str) {}
    fn clear_projectiles(&mut self) {}
    fn remove_peer(&mut self, _id: &PeerId) {}
}

/// Overlap reported by the physics side
#[derive(Debug, Clone, PartialEq)]
pub enum Overlap {
    /// Owned projectile touched a remote participant
    Remote { pid: String, target: PeerId },
    /// Remote projectile touched the local participant
    Local { pid: String },
    /// Projectile touched a platform or left the world
    World { pid: String },
}

/// Shell without rendering: straight-line kinematics and circle overlaps
#[derive(Debug, Clone)]
pub struct HeadlessShell {
    pub position: Vec2,
    pub velocity: Vec2,
    pub aim: Vec2,
    pub layout: ArenaLayout,
    pub banner: Option<String>,
    pub flashes: Vec<PeerId>,
    pub projectiles: HashMap<String, Projectile>,
}

impl HeadlessShell {
    pub fn new() -> Self {
        Self {
            position: Vec2::new(DEFAULT_SPAWN_X, DEFAULT_SPAWN_Y),
            velocity: Vec2::ZERO,
            aim: Vec2::new(1.0, 0.0),
            layout: ArenaLayout::new(),
            banner: None,
            flashes: Vec::new(),
            projectiles: HashMap::new(),
        }
    }

    /// Integrate the local body and every projectile over `dt` seconds
    pub fn step(&mut self, dt: f32) {
        let next = self.position + self.velocity * dt;
        self.position = Vec2::new(
            next.x.clamp(0.0, WORLD_WIDTH),
            next.y.clamp(0.0, WORLD_HEIGHT),
        );
        for projectile in self.projectiles.values_mut() {
            projectile.advance(dt);
        }
    }

    /// Overlaps for this frame, at most one per projectile
    pub fn overlaps<'a, I>(&self, local_id: &PeerId, local_alive: bool, remotes: I) -> Vec<Overlap>
    where
        I: IntoIterator<Item = &'a Participant>,
    {
        let remotes: Vec<&Participant> = remotes.into_iter().filter(|p| p.alive).collect();
        let mut found = Vec::new();

        for projectile in self.projectiles.values() {
            let pid = projectile.pid.clone();
            if projectile.owner == *local_id {
                if let Some(target) = remotes
                    .iter()
                    .find(|p| p.id != projectile.owner && projectile.check_hit(p.position, BODY_RADIUS))
                {
                    found.push(Overlap::Remote {
                        pid,
                        target: target.id.clone(),
                    });
                    continue;
                }
            } else if local_alive && projectile.check_hit(self.position, BODY_RADIUS) {
                found.push(Overlap::Local { pid });
                continue;
            }

            if self.touches_world(projectile.position) {
                found.push(Overlap::World {
                    pid: projectile.pid.clone(),
                });
            }
        }
        found
    }

    fn touches_world(&self, point: Vec2) -> bool {
        if point.x < 0.0 || point.x > WORLD_WIDTH || point.y < 0.0 || point.y > WORLD_HEIGHT {
            return true;
        }
        self.layout.iter().any(|p| {
            (point.x - p.x).abs() <= p.width / 2.0 && (point.y - p.y).abs() <= p.height / 2.0
        })
    }
}

impl Default for HeadlessShell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell for HeadlessShell {
    fn local_position(&self) -> Vec2 {
        self.position
    }

    fn local_velocity(&self) -> Vec2 {
        self.velocity
    }

    fn aim(&self) -> Vec2 {
        self.aim
    }

    fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    fn set_velocity(&mut self, velocity: Vec2) {
        self.velocity = velocity;
    }

    fn play_hit_flash(&mut self, target: &PeerId) {
        self.flashes.push(target.clone());
    }

    fn apply_layout(&mut self, layout: &ArenaLayout) {
        self.layout = layout.clone();
    }

    fn show_banner(&mut self, text: Option<&str>) {
        self.banner = text.map(str::to_string);
    }

    fn spawn_projectile(&mut self, projectile: &Projectile) {
        self.projectiles
            .insert(projectile.pid.clone(), projectile.clone());
    }

    fn destroy_projectile(&mut self, pid: &str) {
        self.projectiles.remove(pid);
    }

    fn clear_projectiles(&mut self) {
        self.projectiles.clear();
    }
}
