//! Reverse proxy for configured path prefixes
//!
//! Requests whose path matches a configured prefix bypass the application's
//! own handlers and are relayed to the target's upstream origin with the
//! right bearer credential attached.

mod body;
mod relay;
mod table;

pub use body::{BodyKind, RelayBody};
pub use relay::{ProxyRouter, RelayedRequest, RelayedResponse, FORWARDED_REQUEST_HEADERS};
pub use table::{MatchMode, ProxyMatch, ProxyTarget, ProxyTargetTable};

use crate::RequestContext;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Proxy errors
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Upstream for {0} is unreachable")]
    UpstreamUnreachable(String),

    #[error("Upstream for {0} timed out")]
    UpstreamTimeout(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Upstream URL for {0} is invalid")]
    InvalidUpstreamUrl(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidUpstreamUrl(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            ProxyError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ProxyError::BodyTooLarge(_) => "BODY_TOO_LARGE",
            ProxyError::BodyRead(_) => "BODY_READ_FAILED",
            ProxyError::InvalidUpstreamUrl(_) => "INVALID_UPSTREAM_URL",
            ProxyError::Client(_) => "INTERNAL_ERROR",
        }
    }

    /// Render as a JSON error response
    pub fn status_response(&self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (self.status(), body).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.status_response()
    }
}

/// First pipeline stage: relay matched paths, pass everything else on
pub async fn proxy_middleware(
    State(router): State<Arc<ProxyRouter>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::attach(&mut request);

    let Some(matched) = router.match_path(&ctx.path) else {
        return next.run(request).await;
    };

    let prefix = matched.target.prefix.clone();
    match router.relay(matched, request).await {
        Ok(response) => {
            tracing::info!(
                request_id = %ctx.request_id,
                prefix = %prefix,
                status = response.status().as_u16(),
                user_agent = ctx.user_agent.as_deref().unwrap_or("-"),
                "Proxied request"
            );
            response
        }
        Err(err) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                prefix = %prefix,
                error = %err,
                "Proxy request failed"
            );
            err.into_response()
        }
    }
}
