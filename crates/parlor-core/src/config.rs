use std::time::Duration;

use crate::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_SOCKET_URL, RECONNECT_INITIAL_DELAY_MS, RECONNECT_MAX_ATTEMPTS,
    RECONNECT_MAX_DELAY_MS,
};

/// Reconnect backoff tuning for the push socket.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(RECONNECT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL for the pull/refresh endpoints
    pub api_base_url: String,
    /// URL of the persistent push socket
    pub socket_url: String,
    pub backoff: BackoffConfig,
}

impl CoreConfig {
    pub fn new(api_base_url: impl Into<String>, socket_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            socket_url: socket_url.into(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_SOCKET_URL)
    }
}
