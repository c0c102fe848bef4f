//! Usage: In-memory auth state above the gateway (boot, sign-in, sign-out).

use crate::domain::auth::{self, UserProfile};
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::session::events::SessionEvent;
use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// How a client start resolved.
#[derive(Debug)]
pub enum BootOutcome {
    /// No stored token; go straight to the sign-in view.
    NoSession,
    /// Stored session is live (possibly after one silent renewal).
    Ready(UserProfile),
    /// Stored session could not be renewed; credentials already cleared.
    SessionInvalid,
    /// Transient failure (network down); token kept for the next attempt.
    ProfileFetchFailed(AppError),
}

struct AuthState {
    booting: bool,
    user: Option<UserProfile>,
}

/// Holds the signed-in user for the rest of the application. Route guards
/// read it; the logged-out broadcast resets it without the gateway knowing
/// this type exists.
pub struct AuthContext<T: Transport> {
    gateway: Arc<ApiGateway<T>>,
    state: Mutex<AuthState>,
}

impl<T: Transport> AuthContext<T> {
    pub fn new(gateway: Arc<ApiGateway<T>>) -> Self {
        Self {
            gateway,
            state: Mutex::new(AuthState {
                booting: true,
                user: None,
            }),
        }
    }

    pub fn gateway(&self) -> &Arc<ApiGateway<T>> {
        &self.gateway
    }

    pub fn is_booting(&self) -> bool {
        self.state.lock_or_recover().booting
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock_or_recover().user.is_some()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.lock_or_recover().user.clone()
    }

    /// Restores the session on client start. A stale access token is fine:
    /// the profile fetch 401s, the gateway renews it and retries, and the
    /// outcome is still `Ready`.
    pub async fn boot(&self) -> BootOutcome {
        let outcome = if self.gateway.store().access().is_none() {
            BootOutcome::NoSession
        } else {
            match auth::me(&self.gateway).await {
                Ok(profile) => {
                    self.set_user(Some(profile.clone()));
                    BootOutcome::Ready(profile)
                }
                Err(err) if err.is_logged_out() => BootOutcome::SessionInvalid,
                Err(err) => {
                    tracing::warn!(error = %err, "profile fetch failed on boot; keeping stored session");
                    BootOutcome::ProfileFetchFailed(err)
                }
            }
        };
        self.state.lock_or_recover().booting = false;
        outcome
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<UserProfile> {
        let token = auth::login(&self.gateway, username, password).await?;
        self.gateway.store().set_access(&token)?;

        let profile = auth::me(&self.gateway).await?;
        self.set_user(Some(profile.clone()));
        Ok(profile)
    }

    /// Signs out. The server call blacklists the refresh cookie but is best
    /// effort: local state is cleared no matter what it says.
    pub async fn logout(&self) {
        if let Err(err) = auth::logout(&self.gateway).await {
            tracing::warn!(error = %err, "server sign-out failed; clearing local session anyway");
        }
        let _ = self.gateway.store().clear();
        self.set_user(None);
        self.gateway.events().notify_logged_out();
    }

    /// Consumer side of the logged-out broadcast.
    pub fn apply_logged_out(&self) {
        self.set_user(None);
    }

    fn set_user(&self, user: Option<UserProfile>) {
        self.state.lock_or_recover().user = user;
    }
}

impl<T: Transport + 'static> AuthContext<T> {
    /// Spawns the task that keeps this context in sync with the session
    /// broadcast. Dropping the handle leaves the task running; abort it to
    /// stop listening.
    pub fn spawn_logged_out_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(self);
        let mut rx = ctx.gateway.events().subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::LoggedOut) => ctx.apply_logged_out(),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
