//! Usage: Single-flight access-token renewal shared by all concurrent 401s.

use crate::session::events::SessionEvents;
use crate::session::token_store::TokenStore;
use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::mask_token;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Credentials returned by the token endpoints. The refresh token, when a
/// server still sends one, is ignored: it lives in an HTTP-only cookie and is
/// never held client-side.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access: Option<String>,
}

struct RefreshState {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<AppResult<String>>>,
}

/// Coordinates token renewal so that an arbitrary number of requests failing
/// with 401 at the same time produce exactly one call to the refresh
/// endpoint.
///
/// The first caller to arrive while no refresh is in flight becomes the
/// leader and runs the supplied refresh future; everyone else parks on a
/// oneshot channel and is settled, in arrival order, with the leader's
/// outcome. The in-flight flag is reset before control returns, so a later
/// 401 wave starts a fresh attempt. The coordinator itself never retries.
pub struct RefreshCoordinator {
    store: Arc<TokenStore>,
    events: Arc<SessionEvents>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<TokenStore>, events: Arc<SessionEvents>) -> Self {
        Self {
            store,
            events,
            state: Mutex::new(RefreshState {
                refreshing: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Returns the renewed access token, or the normalized logged-out error
    /// after the stored credentials have been cleared and the logged-out
    /// broadcast fired.
    ///
    /// `do_refresh` is only invoked by the leader; queued callers share its
    /// outcome without issuing their own network call.
    pub async fn request_refresh<F, Fut>(&self, do_refresh: F) -> AppResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<TokenGrant>>,
    {
        let waiter = {
            let mut state = self.state.lock_or_recover();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(outcome) => outcome,
                // The leader task was dropped before settling the queue.
                Err(_) => Err("SYSTEM_ERROR: refresh leader abandoned its queue"
                    .to_string()
                    .into()),
            };
        }

        let outcome = self.settle(do_refresh().await);

        let waiters = {
            let mut state = self.state.lock_or_recover();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }

        outcome
    }

    fn settle(&self, result: AppResult<TokenGrant>) -> AppResult<String> {
        let renewed = result.and_then(|grant| {
            grant
                .access
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    AppError::from(
                        "AUTH_REFRESH_MALFORMED: refresh response missing access token".to_string(),
                    )
                })
        });

        match renewed {
            Ok(token) => {
                self.store.set_access(&token)?;
                tracing::debug!(token = %mask_token(&token), "access token renewed");
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed; ending session");
                // Leave no half-invalid session behind: credentials are gone
                // and the broadcast has fired before any caller sees the error.
                let _ = self.store.clear();
                self.events.notify_logged_out();
                Err(AppError::session_expired())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::SessionEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    fn coordinator(dir: &tempfile::TempDir) -> (Arc<RefreshCoordinator>, Arc<TokenStore>, Arc<SessionEvents>) {
        let store = Arc::new(TokenStore::open(dir.path()).unwrap());
        let events = Arc::new(SessionEvents::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&events),
        ));
        (coordinator, store, events)
    }

    #[tokio::test]
    async fn leader_persists_renewed_token() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, _events) = coordinator(&dir);
        store.set_access("t1").unwrap();

        let token = coordinator
            .request_refresh(|| async {
                Ok(TokenGrant {
                    access: Some("t2".to_string()),
                })
            })
            .await
            .unwrap();

        assert_eq!(token, "t2");
        assert_eq!(store.access().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, _events) = coordinator(&dir);
        store.set_access("t1").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        // Zero-permit gate: the leader blocks inside do_refresh until the
        // test has proven the other callers enqueued instead of refreshing.
        let gate = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .request_refresh(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _permit = gate.acquire().await.unwrap();
                        Ok(TokenGrant {
                            access: Some("t2".to_string()),
                        })
                    })
                    .await
            }));
        }

        // Let every task reach the coordinator while the leader is parked.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token, "t2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "refresh must be single-flight");
        assert_eq!(store.access().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn failure_rejects_all_waiters_with_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, events) = coordinator(&dir);
        store.set_access("t1").unwrap();
        let mut rx = events.subscribe();

        let gate = Arc::new(Semaphore::new(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .request_refresh(|| async move {
                        let _permit = gate.acquire().await.unwrap();
                        Err(AppError::from("API_HTTP_STATUS: status=401".to_string()))
                    })
                    .await
            }));
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.is_logged_out(), "got {err}");
        }
        assert_eq!(store.access(), None, "credentials must be cleared");
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(rx.try_recv().is_err(), "broadcast fires exactly once");
    }

    #[tokio::test]
    async fn grant_without_access_token_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, events) = coordinator(&dir);
        store.set_access("t1").unwrap();
        let mut rx = events.subscribe();

        let err = coordinator
            .request_refresh(|| async { Ok(TokenGrant { access: None }) })
            .await
            .unwrap_err();

        assert!(err.is_logged_out());
        assert_eq!(store.access(), None);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
    }

    #[tokio::test]
    async fn whitespace_access_token_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, _events) = coordinator(&dir);

        let err = coordinator
            .request_refresh(|| async {
                Ok(TokenGrant {
                    access: Some("   ".to_string()),
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_logged_out());
        assert_eq!(store.access(), None);
    }

    #[tokio::test]
    async fn flag_resets_after_failure_so_next_wave_can_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, store, _events) = coordinator(&dir);

        let err = coordinator
            .request_refresh(|| async {
                Err(AppError::from("API_TRANSPORT: connection reset".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.is_logged_out());

        let token = coordinator
            .request_refresh(|| async {
                Ok(TokenGrant {
                    access: Some("t3".to_string()),
                })
            })
            .await
            .unwrap();
        assert_eq!(token, "t3");
        assert_eq!(store.access().as_deref(), Some("t3"));
    }
}
