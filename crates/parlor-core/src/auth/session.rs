//! Session continuity: every outbound call goes through [`SessionManager::execute`].
//!
//! When a call comes back with an auth failure the manager refreshes the
//! credential and retries the call exactly once. Concurrent callers share a
//! single in-flight refresh. If the refresh itself fails, the token store is
//! cleared, a logout is signaled, and every waiter gets the same terminal
//! error.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::auth::TokenStore;
use crate::error::{ApiError, SessionError};
use crate::models::Credential;

/// Out-of-band signals from the session layer to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Refresh failed terminally; the runtime must stop the socket and
    /// tell the UI to return to the login surface.
    Expired,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, SessionError>>>;

pub struct SessionManager {
    store: Arc<TokenStore>,
    api: Arc<dyn ChatApi>,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
    refresh_in_flight: Mutex<Option<RefreshFuture>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<TokenStore>,
        api: Arc<dyn ChatApi>,
        signal_tx: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        Self {
            store,
            api,
            signal_tx,
            refresh_in_flight: Mutex::new(None),
        }
    }

    /// Run `op` with the current access token, refreshing and retrying
    /// once on an auth failure. A second auth failure is terminal and
    /// never starts another refresh.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, SessionError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = match self.store.token() {
            Some(token) => token,
            None => return Err(SessionError::Expired),
        };

        match op(token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_auth() => {
                debug!("request failed auth, entering refresh path");
                let credential = self.refresh().await?;
                match op(credential.token).await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_auth() => Err(SessionError::Unauthorized),
                    Err(err) => Err(SessionError::Api(err)),
                }
            }
            Err(err) => Err(SessionError::Api(err)),
        }
    }

    /// Refresh the credential, joining an in-flight refresh if one exists.
    ///
    /// Exactly one refresh request is issued no matter how many callers
    /// arrive while it is pending.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        let fut = {
            let mut slot = self.refresh_in_flight.lock().await;
            match slot.as_ref() {
                Some(fut) => fut.clone(),
                None => {
                    let fut = Self::run_refresh(
                        self.store.clone(),
                        self.api.clone(),
                        self.signal_tx.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = fut.await;

        // Retire the slot once resolved so a later expiry can refresh
        // again. Only a completed future is cleared: a fresh in-flight
        // refresh started by another task stays put.
        let mut slot = self.refresh_in_flight.lock().await;
        if slot.as_ref().map(|f| f.peek().is_some()).unwrap_or(false) {
            *slot = None;
        }

        result
    }

    async fn run_refresh(
        store: Arc<TokenStore>,
        api: Arc<dyn ChatApi>,
        signal_tx: mpsc::UnboundedSender<SessionSignal>,
    ) -> Result<Credential, SessionError> {
        let refresh_token = match store.refresh_token() {
            Some(token) => token,
            None => {
                warn!("no refresh token available, forcing logout");
                store.clear();
                let _ = signal_tx.send(SessionSignal::Expired);
                return Err(SessionError::Expired);
            }
        };

        match api.refresh_credential(&refresh_token).await {
            Ok(resp) => {
                let credential = Credential::from_token(resp.access_token);
                store.set(credential.clone());
                if let Some(new_refresh) = resp.refresh_token {
                    store.set_refresh_token(new_refresh);
                }
                info!(subject = ?credential.subject(), "credential refreshed");
                Ok(credential)
            }
            Err(err) => {
                warn!("credential refresh failed: {err}");
                store.clear();
                let _ = signal_tx.send(SessionSignal::Expired);
                Err(SessionError::Expired)
            }
        }
    }
}
