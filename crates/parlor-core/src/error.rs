//! Error taxonomy for the sync core.
//!
//! `ApiError` is a per-request failure from the pull layer. `SessionError`
//! is the terminal outcome of a call routed through the session manager:
//! by the time a caller sees one, the retry-once/refresh machinery has
//! already run. `SocketError` stays internal to the connection manager
//! and only surfaces as state transitions.

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether this failure should route through the credential refresh path.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::Forbidden)
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden,
            other => ApiError::Status(other),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Terminal outcome of a call made through the session manager.
///
/// `Clone` so a single shared refresh future can fan its result out to
/// every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The refresh itself failed; the token store has been cleared and a
    /// logout has been signaled.
    #[error("session expired")]
    Expired,
    /// The request failed auth a second time after a successful refresh.
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("handshake rejected: {0}")]
    AuthRejected(String),
    #[error("websocket error: {0}")]
    Transport(String),
}
