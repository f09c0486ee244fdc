//! Application-wide constants
//!
//! Centralized location for tuning values that are used across
//! multiple modules.

/// Initial delay before the first reconnect attempt
pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;

/// Ceiling for the exponential reconnect delay
pub const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Reconnect attempts before the connection is declared dead
pub const RECONNECT_MAX_ATTEMPTS: u32 = 30;

/// Capacity of the broadcast channel carrying `CoreEvent`s to the UI
pub const CORE_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default API base URL (development server)
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000/api";

/// Default push socket URL (development server)
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:4000/socket";
