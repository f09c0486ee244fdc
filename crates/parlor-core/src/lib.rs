//! Client-resident synchronization core for a chat application.
//!
//! Keeps a local cache of conversations and messages consistent with the
//! server under concurrent pull requests and push events, tracks unread
//! state per conversation, and maintains the authenticated session
//! across token rotation. The UI layer is an external collaborator: it
//! reads snapshots through [`runtime::CoreRuntime`] and reacts to
//! [`events::CoreEvent`]s.

pub mod api;
pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod runtime;
pub mod socket;
pub mod store;
pub mod tracing_setup;

pub use api::{ChatApi, HttpApi};
pub use auth::{SessionManager, TokenStore};
pub use config::CoreConfig;
pub use error::{ApiError, SessionError, SocketError};
pub use events::CoreEvent;
pub use models::{Conversation, Credential, Message};
pub use runtime::CoreRuntime;
pub use socket::{ConnectionManager, ConnectionState, PushEvent};
pub use store::{CacheSyncEngine, UnreadTracker};
