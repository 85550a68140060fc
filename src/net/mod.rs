//! Networking: wire protocol, transport channels, the adapter and the relay

pub mod adapter;
pub mod channel;
pub mod protocol;
pub mod relay;

pub use adapter::{NetAdapter, NetEvent};
pub use channel::{Channel, ChannelEvent, HubChannel, MemoryHub, OfflineChannel, UdpChannel};

/// Transport errors. These never leave the adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Relay endpoint did not resolve: {0}")]
    Unresolved(String),

    #[error("Channel closed")]
    Closed,
}
