use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::AuthError;

/// Narrow capability the core consumes from the external auth collaborator.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a valid bearer credential, minting a fresh one when
    /// `force_refresh` is set.
    async fn fetch_token(&self, force_refresh: bool) -> Result<String, AuthError>;
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Bearer-credential source with single-refresh-in-flight deduplication:
/// concurrent forced refreshes join the one refresh already running instead
/// of hammering the provider.
#[derive(Clone)]
pub struct AuthService {
    provider: Arc<dyn TokenProvider>,
    refreshing: Arc<Mutex<Option<RefreshFuture>>>,
}

impl AuthService {
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            refreshing: Arc::new(Mutex::new(None)),
        }
    }

    /// Always returns a valid token.
    ///
    /// Without `force_refresh` the provider's cached token is used directly.
    /// With it, callers share a single in-flight refresh.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` when the provider cannot produce a credential.
    pub async fn token(&self, force_refresh: bool) -> Result<String, AuthError> {
        if !force_refresh {
            return self.provider.fetch_token(false).await;
        }

        let refresh = {
            let mut slot = self
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let provider = Arc::clone(&self.provider);
                    let clear = Arc::clone(&self.refreshing);
                    let refresh: RefreshFuture = async move {
                        let result = provider.fetch_token(true).await;
                        clear
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };
        refresh.await
    }
}
