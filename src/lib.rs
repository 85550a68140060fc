//! Arena Sync - peer-to-peer synchronization core for a multiplayer arena
//!
//! - `net`: wire protocol, best-effort transport channels, the rate-limited adapter and the relay
//! - `game`: peer registry, round coordination, hit arbitration and the session loop
//! - `app` / `http`: the headless peer and relay wiring used by the binary

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod util;
