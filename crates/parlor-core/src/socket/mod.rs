pub mod client;
pub mod events;

pub use client::{ConnectionManager, ConnectionState, PushStream, SocketTransport, WsTransport};
pub use events::PushEvent;
