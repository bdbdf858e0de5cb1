//! Observable authentication state.
//!
//! [`AuthSession`] mirrors the identity of an [`AuthProvider`] into a
//! `watch` channel so the sync engine can react to sign-in and sign-out.

use std::sync::{Arc, OnceLock};
use tidal_transport::{AuthError, AuthProvider, Principal};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// The signed-in principal.
    pub principal: Option<Principal>,
    /// Whether the session is still being resolved or an auth call is running.
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            principal: None,
            loading: true,
        }
    }
}

/// Tracks who is signed in.
pub struct AuthSession {
    provider: Arc<dyn AuthProvider>,
    state: Arc<watch::Sender<AuthState>>,
    listener: OnceLock<JoinHandle<()>>,
}

impl AuthSession {
    /// Create a session backed by `provider`. Call [`init`](Self::init) to resolve it.
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            provider,
            state: Arc::new(state),
            listener: OnceLock::new(),
        }
    }

    /// Resolve the current principal and start following identity changes.
    pub async fn init(&self) {
        self.set_loading(true);

        // Register before reading so no change slips between the two.
        let events = self.provider.identity_events();

        match self.provider.current_principal().await {
            Ok(principal) => {
                debug!(principal = ?principal, "Initial session resolved");
                self.set_principal(principal);
            }
            Err(e) => error!(error = %e, "Failed to resolve initial session"),
        }

        self.listener
            .get_or_init(|| spawn_listener(events, Arc::clone(&self.state)));
        self.set_loading(false);
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the current principal is left unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        self.set_loading(true);
        let result = self.provider.sign_in(email, password).await;
        if let Ok(principal) = &result {
            info!(principal = %principal, "Signed in");
            self.set_principal(Some(principal.clone()));
        }
        self.set_loading(false);
        result
    }

    /// Create an account and sign in if the provider allows it immediately.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the current principal is left unchanged.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Principal>, AuthError> {
        self.set_loading(true);
        let result = self.provider.sign_up(email, password).await;
        if let Ok(principal) = &result {
            info!(email = %email, confirmed = principal.is_some(), "Signed up");
            self.set_principal(principal.clone());
        }
        self.set_loading(false);
        result
    }

    /// End the session.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; the current principal is left unchanged.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.set_loading(true);
        let result = self.provider.sign_out().await;
        if result.is_ok() {
            info!("Signed out");
            self.set_principal(None);
        }
        self.set_loading(false);
        result
    }

    /// The signed-in principal.
    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.state.borrow().principal.clone()
    }

    /// Whether a principal is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().principal.is_some()
    }

    /// Whether the session is being resolved.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Copy of the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    fn set_principal(&self, principal: Option<Principal>) {
        update_principal(&self.state, principal);
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|state| {
            if state.loading == loading {
                return false;
            }
            state.loading = loading;
            true
        });
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get() {
            listener.abort();
        }
    }
}

fn update_principal(state: &watch::Sender<AuthState>, principal: Option<Principal>) {
    state.send_if_modified(|state| {
        if state.principal == principal {
            return false;
        }
        state.principal = principal;
        true
    });
}

fn spawn_listener(
    mut events: broadcast::Receiver<tidal_transport::IdentityEvent>,
    state: Arc<watch::Sender<AuthState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    info!(kind = ?event.kind, principal = ?event.principal, "Auth state changed");
                    update_principal(&state, event.principal);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Identity listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Identity listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tidal_transport::MemoryBackend;

    async fn settle<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_init_resolves_existing_session() {
        let backend = MemoryBackend::new();
        backend.set_principal(Some(Principal::from_email("u@x.com")));

        let auth = AuthSession::new(Arc::new(backend));
        assert!(auth.is_loading());

        auth.init().await;
        assert!(!auth.is_loading());
        assert!(auth.is_authenticated());
        assert_eq!(auth.principal(), Some(Principal::from_email("u@x.com")));
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let backend = MemoryBackend::new();
        backend.add_account("u@x.com", "hunter2");
        let auth = AuthSession::new(Arc::new(backend));
        auth.init().await;
        assert!(!auth.is_authenticated());

        let err = auth.sign_in("u@x.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert!(!auth.is_authenticated());

        let principal = auth.sign_in("u@x.com", "hunter2").await.unwrap();
        assert_eq!(principal.filter_value(), Some("u@x.com"));
        assert!(auth.is_authenticated());

        auth.sign_out().await.unwrap();
        assert!(auth.principal().is_none());
        assert!(!auth.is_loading());
    }

    #[tokio::test]
    async fn test_sign_up_signs_in() {
        let backend = MemoryBackend::new();
        let auth = AuthSession::new(Arc::new(backend));
        auth.init().await;

        let principal = auth.sign_up("new@x.com", "pw").await.unwrap();
        assert_eq!(principal, Some(Principal::from_email("new@x.com")));
        assert!(auth.is_authenticated());

        let err = auth.sign_up("new@x.com", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "User already registered");
    }

    #[tokio::test]
    async fn test_follows_provider_identity_events() {
        let backend = MemoryBackend::new();
        let auth = AuthSession::new(Arc::new(backend.clone()));
        auth.init().await;
        let mut rx = auth.watch();

        backend.set_principal(Some(Principal::from_email("u@x.com")));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().principal,
            Some(Principal::from_email("u@x.com"))
        );

        // Session expired on the provider side.
        backend.set_principal(None);
        settle(|| auth.principal().is_none()).await;
    }
}
