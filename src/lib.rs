//! Sessiongate - an edge gateway for a content-sharing web application
//!
//! Sessiongate sits in front of the application's own handlers and does two
//! things for every request:
//! - relays configured path prefixes to upstream services (content backend,
//!   inference services, chat services), injecting the right bearer credential
//!   and passing bodies through byte for byte
//! - keeps the browser session alive, refreshing expired access tokens,
//!   redirecting anonymous users away from protected routes and narrowing
//!   circle-scoped queries to the circles the user belongs to

pub mod config;
pub mod gateway;
pub mod handlers;
pub mod proxy;
pub mod session;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Core error types for Sessiongate
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::Proxy(err) => return err.status_response(),
            GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            GatewayError::Session(_) => (StatusCode::BAD_GATEWAY, "IDENTITY_UNAVAILABLE"),
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            GatewayError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// A secret string wrapper that never prints its value
#[derive(Debug, Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Create a new secret from a string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// Context for a request travelling through the gateway pipeline
///
/// Created by the first pipeline stage and carried in the request
/// extensions so later stages and handlers share one request id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier
    pub request_id: String,
    /// Request path as received
    pub path: String,
    /// User agent string
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Create a new request context with generated ID
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            path: path.into(),
            user_agent: None,
        }
    }

    /// Build a context from the incoming request line and headers
    pub fn from_parts(path: &str, headers: &HeaderMap) -> Self {
        let mut ctx = Self::new(path);
        ctx.user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        ctx
    }

    /// Reuse the context of an earlier pipeline stage or create and store one
    pub fn attach(request: &mut axum::extract::Request) -> Self {
        if let Some(ctx) = request.extensions().get::<RequestContext>() {
            return ctx.clone();
        }

        let ctx = Self::from_parts(request.uri().path(), request.headers());
        request.extensions_mut().insert(ctx.clone());
        ctx
    }
}
