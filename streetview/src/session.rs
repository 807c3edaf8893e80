//! Lazily created, shared session token.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::error::{FetchError, StreetViewError};
use crate::retry::RetryPolicy;
use crate::service::TileService;

/// Session token shared by all requests of one downloader.
///
/// The token is created on first use. A request rejected with HTTP 401 causes one refresh for the
/// lifetime of the store; requests that observed the same stale token reuse the refreshed one.
#[derive(Debug, Default)]
pub struct SessionStore {
    token: Mutex<Option<String>>,
    refreshed: AtomicBool,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token, creating it on first call.
    pub async fn token(
        &self,
        service: &dyn TileService,
        retry: &RetryPolicy,
    ) -> Result<String, StreetViewError> {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }

        let created = create(service, retry).await?;
        log::debug!("Created tile service session");
        *token = Some(created.clone());
        Ok(created)
    }

    /// Replaces `stale` with a new token, at most once per store.
    pub async fn refresh(
        &self,
        stale: &str,
        service: &dyn TileService,
        retry: &RetryPolicy,
    ) -> Result<String, StreetViewError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current != stale {
                return Ok(current.clone());
            }
        }

        if self.refreshed.swap(true, Ordering::SeqCst) {
            return Err(StreetViewError::SessionExpired);
        }

        log::info!("Session token rejected, creating a new session");
        let created = create(service, retry).await?;
        *token = Some(created.clone());
        Ok(created)
    }

    /// Runs a session-authenticated request under the retry policy, refreshing the session once if
    /// the server rejects it.
    pub async fn call<T, F, Fut>(
        &self,
        service: &dyn TileService,
        retry: &RetryPolicy,
        mut request: F,
    ) -> Result<T, StreetViewError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let token = self.token(service, retry).await?;
        let err = match retry.run(|| request(token.clone())).await {
            Ok(value) => return Ok(value),
            Err(err) if err.error.is_unauthorized() => err,
            Err(err) => return Err(StreetViewError::from_fetch(err.error, err.attempts)),
        };

        log::debug!("Request rejected with session: {}", err.error);
        let token = self.refresh(&token, service, retry).await?;
        retry
            .run(|| request(token.clone()))
            .await
            .map_err(|err| {
                if err.error.is_unauthorized() {
                    StreetViewError::SessionExpired
                } else {
                    StreetViewError::from_fetch(err.error, err.attempts)
                }
            })
    }
}

async fn create(service: &dyn TileService, retry: &RetryPolicy) -> Result<String, StreetViewError> {
    retry
        .run(|| service.create_session())
        .await
        .map_err(|err| {
            StreetViewError::SessionUnavailable(Box::new(StreetViewError::from_fetch(
                err.error,
                err.attempts,
            )))
        })
}
