//! Access tokens and single-flight refresh.
//!
//! `RefreshCoordinator` owns the pending refresh future: the first caller
//! starts it, concurrent callers await a clone of the same shared future,
//! and the slot is cleared once it settles so the next expiry starts over.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::ApiError;

/// Bearer token for the order API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Produces a fresh access token, e.g. from a refresh-token endpoint.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<AccessToken, ApiError>;
}

type SharedRefresh<T> = Shared<BoxFuture<'static, Result<T, Arc<ApiError>>>>;
type RefreshSlot<T> = Mutex<Option<(u64, SharedRefresh<T>)>>;

fn lock_slot<T>(slot: &RefreshSlot<T>) -> MutexGuard<'_, Option<(u64, SharedRefresh<T>)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// At most one refresh in flight per coordinator.
pub struct RefreshCoordinator<T> {
    in_flight: Arc<RefreshSlot<T>>,
    generation: AtomicU64,
}

impl<T> Default for RefreshCoordinator<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> RefreshCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        lock_slot(&self.in_flight).is_some()
    }

    /// Join the refresh in flight, or start one with `start`.
    ///
    /// `start` is only called when no refresh is pending. The refresh
    /// releases the slot itself as it settles, so a settled result is never
    /// handed to a later caller.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, Arc<ApiError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let refresh = {
            let mut slot = lock_slot(&self.in_flight);
            match slot.as_ref() {
                Some((_, refresh)) => {
                    tracing::debug!("Joining refresh already in flight");
                    refresh.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let owner = Arc::downgrade(&self.in_flight);
                    let work = start();
                    let refresh = async move {
                        let result = work.await.map_err(Arc::new);
                        if let Some(owner) = owner.upgrade() {
                            let finished = {
                                let mut slot = lock_slot(&owner);
                                if slot.as_ref().is_some_and(|(current, _)| *current == generation) {
                                    slot.take()
                                } else {
                                    None
                                }
                            };
                            drop(finished);
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((generation, refresh.clone()));
                    refresh
                }
            }
        };

        refresh.await
    }
}

/// Current access token plus the means to renew it.
pub struct TokenStore {
    token: RwLock<Option<AccessToken>>,
    refresher: Arc<dyn TokenRefresher>,
    coordinator: RefreshCoordinator<AccessToken>,
}

impl TokenStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            token: RwLock::new(None),
            refresher,
            coordinator: RefreshCoordinator::new(),
        }
    }

    pub fn with_token(refresher: Arc<dyn TokenRefresher>, token: AccessToken) -> Self {
        let store = Self::new(refresher);
        store.set(token);
        store
    }

    pub fn current(&self) -> Option<AccessToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: AccessToken) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Current token, refreshing first if there is none.
    pub async fn token(&self) -> Result<AccessToken, ApiError> {
        match self.current() {
            Some(token) => Ok(token),
            None => self.refresh().await,
        }
    }

    /// Replace the token. Concurrent callers share one refresh.
    pub async fn refresh(&self) -> Result<AccessToken, ApiError> {
        let refresher = Arc::clone(&self.refresher);
        let token = self
            .coordinator
            .run(move || async move { refresher.refresh().await })
            .await
            .map_err(|e| ApiError::Refresh(e.to_string()))?;
        self.set(token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let coordinator = RefreshCoordinator::<u32>::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = coordinator.run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(7)
            }
        });
        let second = coordinator.run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            async { Ok(8) }
        });
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_one();
        };

        let (a, b, ()) = tokio::join!(first, second, release);

        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn failed_refresh_clears_the_slot() {
        let coordinator = RefreshCoordinator::<u32>::new();

        let err = coordinator
            .run(|| async { Err(ApiError::Unauthorized) })
            .await
            .unwrap_err();
        assert!(matches!(*err, ApiError::Unauthorized));
        assert!(!coordinator.is_in_flight());

        let ok = coordinator.run(|| async { Ok(1) }).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn settled_refresh_is_not_joined_by_later_callers() {
        let coordinator = RefreshCoordinator::<u32>::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut first = Box::pin(coordinator.run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Err(ApiError::Unauthorized)
            }
        }));
        let mut second = Box::pin(coordinator.run(|| {
            starts.fetch_add(1, Ordering::SeqCst);
            async { Ok(0) }
        }));
        assert!(futures_util::poll!(first.as_mut()).is_pending());
        assert!(futures_util::poll!(second.as_mut()).is_pending());

        gate.notify_one();
        assert!(first.await.is_err());

        // `second` has not resumed yet, but the failed refresh is already gone
        assert!(!coordinator.is_in_flight());
        let third = coordinator
            .run(|| {
                starts.fetch_add(1, Ordering::SeqCst);
                async { Ok(3) }
            })
            .await
            .unwrap();
        assert_eq!(third, 3);
        assert_eq!(starts.load(Ordering::SeqCst), 2);

        assert!(matches!(second.await, Err(e) if matches!(*e, ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn token_store_refreshes_only_when_empty() {
        let mut refresher = MockTokenRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok(AccessToken::new("fresh")));
        let store = TokenStore::new(Arc::new(refresher));

        assert_eq!(store.token().await.unwrap().as_str(), "fresh");
        assert_eq!(store.token().await.unwrap().as_str(), "fresh");
    }

    #[tokio::test]
    async fn token_store_surfaces_refresh_failure_and_retries_next_time() {
        let mut refresher = MockTokenRefresher::new();
        let mut seq = mockall::Sequence::new();
        refresher
            .expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ApiError::Status { status: 500, body: "down".into() }));
        refresher
            .expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(AccessToken::new("second")));
        let store = TokenStore::with_token(Arc::new(refresher), AccessToken::new("stale"));

        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, ApiError::Refresh(msg) if msg.contains("500")));
        assert_eq!(store.current().unwrap().as_str(), "stale");

        assert_eq!(store.refresh().await.unwrap().as_str(), "second");
    }

    #[test]
    fn token_debug_is_redacted() {
        assert_eq!(format!("{:?}", AccessToken::new("secret")), "AccessToken(***)");
    }
}
