//! Session driver and local status endpoint for the Tidal client.
//!
//! This module connects, signs in, runs the sync session until Ctrl-C,
//! and optionally serves the synchronized records over HTTP.

use crate::config::{AuthConfig, Config};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tidal_core::{AuthSession, LifecycleState, StoreState, SyncContext, SyncSession};
use tidal_transport::{AuthError, SubscriptionId, WebSocketClient};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared state of the status endpoint.
pub struct AppState {
    /// The running session.
    pub session: Arc<SyncSession>,
    /// Server-assigned connection ID.
    pub connection_id: String,
}

/// Connect, sign in and keep the session in sync until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the connection cannot be established, sign-in is
/// rejected, or the status endpoint cannot bind.
pub async fn run_client(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let client = Arc::new(
        WebSocketClient::connect(config.websocket())
            .await
            .with_context(|| format!("Failed to connect to {}", config.url))?,
    );
    let _metrics_guard = ConnectionMetricsGuard::new();
    info!(url = %config.url, connection = %client.connection_id(), "Connected");

    let auth = Arc::new(AuthSession::new(client.clone()));
    auth.init().await;
    sign_in(&auth, &config.auth).await?;

    let context = SyncContext::new(client.clone(), Arc::clone(&auth), config.sync.clone());
    let session = Arc::new(context.session());
    let observer = tokio::spawn(observe(Arc::clone(&session)));

    let status_server = if config.status.enabled {
        let addr = config.status_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status endpoint on {}", addr))?;
        let app = status_router(Arc::new(AppState {
            session: Arc::clone(&session),
            connection_id: client.connection_id().to_string(),
        }));

        info!("Status endpoint listening on http://{}", addr);
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Status endpoint failed");
            }
        }))
    } else {
        None
    };

    tokio::select! {
        () = session.run() => warn!("Auth session ended"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        },
    }

    session.shutdown().await;
    observer.abort();
    if let Some(server) = status_server {
        server.abort();
    }
    client.disconnect();

    info!("Disconnected");
    Ok(())
}

/// Resume the token session or sign in with the configured credentials.
async fn sign_in(auth: &AuthSession, credentials: &AuthConfig) -> Result<()> {
    if let Some(principal) = auth.principal() {
        info!(principal = %principal, "Session resumed");
        return Ok(());
    }

    let (Some(email), Some(password)) = (&credentials.email, &credentials.password) else {
        warn!("No credentials configured, waiting for a session");
        return Ok(());
    };

    match auth.sign_in(email, password).await {
        Ok(_) => Ok(()),
        Err(AuthError::Rejected(reason)) if credentials.sign_up => {
            info!(email = %email, reason = %reason, "Sign-in rejected, signing up");
            let principal = auth
                .sign_up(email, password)
                .await
                .context("Sign-up failed")?;
            if principal.is_none() {
                warn!(email = %email, "Account created, confirm it before signing in");
            }
            Ok(())
        }
        Err(e) => {
            metrics::record_error("auth");
            Err(e).context("Sign-in failed")
        }
    }
}

/// Log store and lifecycle changes and feed them into metrics.
async fn observe(session: Arc<SyncSession>) {
    let mut store = session.watch();
    let mut lifecycle = session.watch_lifecycle();
    let mut last_error: Option<String> = None;
    let mut subscription: Option<SubscriptionId> = None;

    loop {
        tokio::select! {
            changed = store.changed() => {
                if changed.is_err() {
                    break;
                }
                let (count, status, error) = {
                    let state = store.borrow_and_update();
                    (state.len(), state.status(), state.last_error().map(str::to_string))
                };

                info!(records = count, status = ?status, "Records changed");
                metrics::record_store_update(count);
                metrics::record_reconciler(session.stats());

                if let Some(message) = error.as_ref().filter(|e| last_error.as_ref() != Some(*e)) {
                    warn!(error = %message, "Sync error");
                    metrics::record_error("sync");
                }
                last_error = error;
            }
            changed = lifecycle.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = lifecycle.borrow_and_update().clone();
                debug!(state = ?status.state, generation = status.generation, "Lifecycle changed");

                if status.state == LifecycleState::Bound && status.subscription != subscription {
                    metrics::record_subscription();
                }
                subscription = status.subscription;
            }
        }
    }
}

/// Build the status endpoint router.
pub fn status_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/records", get(records_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let healthy = state.session.context().transport().is_healthy();
    let lifecycle = state.session.lifecycle();

    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "connection": state.connection_id,
        "lifecycle": lifecycle.state,
        "principal": lifecycle.principal,
        "generation": lifecycle.generation,
    }))
}

/// Records handler.
async fn records_handler(State(state): State<Arc<AppState>>) -> Json<StoreState> {
    Json(state.session.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_core::SyncConfig;
    use tidal_transport::{MemoryBackend, Principal};

    fn app_state(backend: &MemoryBackend) -> Arc<AppState> {
        let auth = Arc::new(AuthSession::new(Arc::new(backend.clone())));
        let context = SyncContext::new(Arc::new(backend.clone()), auth, SyncConfig::new("inbox"));
        Arc::new(AppState {
            session: Arc::new(context.session()),
            connection_id: "conn_test".to_string(),
        })
    }

    #[tokio::test]
    async fn test_health_reports_lifecycle() {
        let backend = MemoryBackend::new();
        let state = app_state(&backend);

        let Json(body) = health_handler(State(Arc::clone(&state))).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connection"], "conn_test");
        assert_eq!(body["lifecycle"], "unbound");
        assert!(body["principal"].is_null());
    }

    #[tokio::test]
    async fn test_records_returns_snapshot() {
        let backend = MemoryBackend::new();
        backend.seed(
            "inbox",
            vec![json!({"id": 1, "from_email": "u@x.com", "created_at": 1})],
        );
        backend.set_principal(Some(Principal::from_email("u@x.com")));
        let state = app_state(&backend);
        state.session.context().auth().init().await;
        state.session.initialize().await.unwrap();

        let Json(snapshot) = records_handler(State(Arc::clone(&state))).await;
        assert_eq!(snapshot.len(), 1);

        let body = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["records"][0]["fields"]["from_email"], "u@x.com");
    }

    #[tokio::test]
    async fn test_sign_in_without_credentials_waits() {
        let backend = MemoryBackend::new();
        let auth = AuthSession::new(Arc::new(backend));
        auth.init().await;

        sign_in(&auth, &AuthConfig::default()).await.unwrap();
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_in_falls_back_to_sign_up() {
        let backend = MemoryBackend::new();
        let auth = AuthSession::new(Arc::new(backend));
        auth.init().await;

        let credentials = AuthConfig {
            email: Some("new@x.com".to_string()),
            password: Some("pw".to_string()),
            token: None,
            sign_up: true,
        };
        sign_in(&auth, &credentials).await.unwrap();
        assert_eq!(auth.principal(), Some(Principal::from_email("new@x.com")));
    }

    #[tokio::test]
    async fn test_rejected_sign_in_is_an_error() {
        let backend = MemoryBackend::new();
        backend.add_account("u@x.com", "right");
        let auth = AuthSession::new(Arc::new(backend));
        auth.init().await;

        let credentials = AuthConfig {
            email: Some("u@x.com".to_string()),
            password: Some("wrong".to_string()),
            ..AuthConfig::default()
        };
        let err = sign_in(&auth, &credentials).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid login credentials"));
    }

    #[test]
    fn test_router_builds() {
        let backend = MemoryBackend::new();
        let _router = status_router(app_state(&backend));
    }
}
