use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::Credential;

#[derive(Default)]
struct StoreInner {
    credential: Option<Credential>,
    refresh_token: Option<String>,
}

/// Shared holder for the current access credential and its refresh token.
///
/// Constructed once at application start and injected wherever a token is
/// needed; mutation only happens through these methods, so readers never
/// observe a half-replaced credential.
#[derive(Default)]
pub struct TokenStore {
    inner: RwLock<StoreInner>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new credential, replacing any previous one wholesale.
    pub fn set(&self, credential: Credential) {
        self.inner.write().credential = Some(credential);
    }

    pub fn set_refresh_token(&self, refresh_token: impl Into<String>) {
        self.inner.write().refresh_token = Some(refresh_token.into());
    }

    pub fn get(&self) -> Option<Credential> {
        self.inner.read().credential.clone()
    }

    /// The raw access token, for attaching to outbound requests.
    pub fn token(&self) -> Option<String> {
        self.inner.read().credential.as_ref().map(|c| c.token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.read().refresh_token.clone()
    }

    pub fn subject(&self) -> Option<String> {
        self.inner
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.subject().map(str::to_string))
    }

    pub fn role(&self) -> Option<String> {
        self.inner
            .read()
            .credential
            .as_ref()
            .and_then(|c| c.role().map(str::to_string))
    }

    /// Absent or claim-less credentials count as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.inner.read().credential {
            Some(cred) => cred.is_expired(now),
            None => true,
        }
    }

    /// Drop both tokens. Called on logout and on terminal refresh failure.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.credential = None;
        inner.refresh_token = None;
    }
}
