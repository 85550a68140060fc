//! Relay state shared between the UDP relay and the HTTP routes

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::net::relay::RoomRegistry;

/// Shared relay state
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub rooms: Arc<RoomRegistry>,
}

impl RelayState {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self {
            config,
            rooms: Arc::new(RoomRegistry::new()),
        }
    }
}
