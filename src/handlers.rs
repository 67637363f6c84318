//! Built-in handlers behind the gateway pipeline

use crate::session::{
    return_target, CredentialStore, IdentityClient, SessionContext, SessionError, SessionManager,
};
use crate::GatewayError;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Extension, Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// State shared by the handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub identity: Arc<IdentityClient>,
}

/// Routes served by the gateway itself
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/auth/sign-in", get(sign_in_page).post(sign_in))
        .route("/auth/sign-out", get(sign_out).post(sign_out))
        .route("/api/session", get(session_info))
        .fallback(not_found)
        .with_state(state)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Who the current request belongs to
pub async fn session_info(Extension(session): Extension<SessionContext>) -> Json<Value> {
    Json(json!({
        "authenticated": session.is_authenticated(),
        "user_id": session.user_id,
        "circles": session.circles,
        "request_id": session.request_id,
    }))
}

/// Signed-in users are sent back to where they came from
pub async fn sign_in_page(
    Extension(session): Extension<SessionContext>,
    RawQuery(query): RawQuery,
) -> Response {
    let target = return_target(query.as_deref());

    if session.is_authenticated() {
        tracing::debug!(request_id = %session.request_id, target = %target, "Already signed in");
        return Redirect::temporary(&target).into_response();
    }

    Json(json!({ "authenticated": false, "redirect": target })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Exchange credentials for a session
pub async fn sign_in(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    jar: CookieJar,
    Json(request): Json<SignInRequest>,
) -> Result<Response, GatewayError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(GatewayError::InvalidRequest("email and password are required".into()));
    }

    let tokens = state
        .identity
        .login(request.email.trim(), &request.password)
        .await
        .map_err(|e| match e {
            SessionError::LoginRejected(_) => GatewayError::Unauthorized("invalid email or password".into()),
            other => GatewayError::Session(other),
        })?;

    let circles = state.identity.fetch_circles(&tokens.access_token).await?;

    let mut store = CredentialStore::new(jar, state.sessions.cookie_policy().clone());
    store.store_tokens(&tokens);
    store.store_circles(&circles);

    let target = return_target(query.as_deref());
    tracing::info!(circles = circles.len(), "User signed in");

    Ok((store.into_jar(), Json(json!({ "redirect": target }))).into_response())
}

/// Drop every session cookie
pub async fn sign_out(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let mut store = CredentialStore::new(jar, state.sessions.cookie_policy().clone());
    store.clear_all();
    (store.into_jar(), Redirect::to("/"))
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "code": "NOT_FOUND",
                "message": "No route for this path",
            }
        })),
    )
        .into_response()
}
