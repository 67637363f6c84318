//! Gateway pipeline
//!
//! Every request runs the proxy stage first and the session stage second:
//! proxied paths never pay for session resolution, everything else reaches the
//! application handlers only with a resolved session.

use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::proxy::{proxy_middleware, ProxyRouter};
use crate::session::{session_middleware, IdentityClient, SessionManager, TokenRefresher};
use crate::GatewayError;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// The assembled gateway
pub struct Gateway {
    config: Config,
    proxy: Arc<ProxyRouter>,
    sessions: Arc<SessionManager>,
    identity: Arc<IdentityClient>,
}

impl Gateway {
    /// Create a gateway that refreshes tokens through the configured identity service
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        let identity = Arc::new(IdentityClient::new(&config.identity)?);
        Self::build(config, identity.clone(), identity)
    }

    /// Create a gateway with a custom token refresher
    pub fn with_refresher(config: Config, refresher: Arc<dyn TokenRefresher>) -> Result<Self, GatewayError> {
        let identity = Arc::new(IdentityClient::new(&config.identity)?);
        Self::build(config, identity, refresher)
    }

    fn build(
        config: Config,
        identity: Arc<IdentityClient>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Self, GatewayError> {
        let proxy = Arc::new(ProxyRouter::new(&config.proxy)?);
        let sessions = Arc::new(SessionManager::new(&config.session, refresher));

        Ok(Self {
            config,
            proxy,
            sessions,
            identity,
        })
    }

    /// State shared by the built-in handlers
    pub fn state(&self) -> AppState {
        AppState {
            sessions: self.sessions.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Put the pipeline in front of an application router
    ///
    /// The application is mounted as a fallback service so unmatched paths,
    /// proxied ones included, still pass through both stages.
    pub fn wrap(&self, app: Router) -> Router {
        let pipeline = Router::new()
            .fallback_service(app)
            .layer(middleware::from_fn_with_state(self.sessions.clone(), session_middleware))
            .layer(middleware::from_fn_with_state(self.proxy.clone(), proxy_middleware));

        Router::new()
            .route("/health", get(handlers::health))
            .merge(pipeline)
            .layer(TraceLayer::new_for_http())
    }

    /// The gateway in front of the built-in handlers
    pub fn router(&self) -> Router {
        self.wrap(handlers::routes(self.state()))
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.config.server.bind).await?;

        tracing::info!(
            bind = %self.config.server.bind,
            proxy_targets = self.proxy.table().targets().len(),
            "Starting Sessiongate"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Sessiongate stopped");
        Ok(())
    }

    /// Get the bind address
    pub fn bind_address(&self) -> &str {
        &self.config.server.bind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
