//! Session stage of the gateway pipeline

use super::cookies::CredentialStore;
use super::manager::{SessionAction, SessionContext, SessionManager};
use crate::RequestContext;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;

/// Resolve the session, then redirect or hand the request to the next stage
///
/// Cookie changes made during resolution go out with whatever response is
/// produced. After a refresh the forwarded `Cookie` header is rewritten so
/// handlers see the new tokens.
pub async fn session_middleware(
    State(manager): State<Arc<SessionManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::attach(&mut request);
    let mut store = CredentialStore::from_headers(request.headers(), manager.cookie_policy().clone());

    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let resolution = manager
        .resolve_session(&path, query.as_deref(), &mut store)
        .await;

    if let SessionAction::Redirect(location) = &resolution.action {
        tracing::info!(
            request_id = %ctx.request_id,
            path = %path,
            state = ?resolution.state,
            location = %location,
            "Session redirect"
        );
        return (store.into_jar(), Redirect::temporary(location)).into_response();
    }

    if store.is_modified() {
        let cookie = store.request_cookie_header();
        request.headers_mut().remove(header::COOKIE);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            if !cookie.is_empty() {
                request.headers_mut().insert(header::COOKIE, value);
            }
        }
    }

    request
        .extensions_mut()
        .insert(SessionContext::new(&ctx, resolution.session.as_ref()));

    let response = next.run(request).await;
    (store.into_jar(), response).into_response()
}
