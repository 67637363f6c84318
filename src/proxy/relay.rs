//! Credential-injecting relay to upstream origins
//!
//! Handles:
//! - Copying an allow-list of caller headers, dropping everything else
//! - Injecting `Authorization: Bearer` from the target or the caller's session
//! - Relaying bodies of any content type without altering their bytes
//! - Returning the upstream status and headers to the caller

use super::body::{BodyKind, RelayBody};
use super::table::{ProxyMatch, ProxyTargetTable};
use super::ProxyError;
use crate::config::ProxyConfig;
use crate::session::access_token_from_headers;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller headers copied to the upstream request
pub const FORWARDED_REQUEST_HEADERS: [HeaderName; 5] = [
    header::ACCEPT,
    header::USER_AGENT,
    header::ACCEPT_ENCODING,
    header::ACCEPT_LANGUAGE,
    header::CONTENT_TYPE,
];

/// Upstream headers that must not reach the caller
///
/// The client has already decoded the body, so `content-encoding` would be a lie.
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Request about to be sent upstream
#[derive(Debug, Clone)]
pub struct RelayedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

/// Response received from upstream
#[derive(Debug, Clone)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl IntoResponse for RelayedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body.into_bytes()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Routes prefixed paths to their upstream origin
pub struct ProxyRouter {
    table: ProxyTargetTable,
    client: Client,
    change_origin: bool,
    debug: bool,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ProxyRouter {
    /// Create a router from the proxy configuration
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self {
            table: ProxyTargetTable::new(config.targets.clone(), config.match_mode),
            client,
            change_origin: config.change_origin,
            debug: config.debug,
            timeout: config.timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Get the target table
    pub fn table(&self) -> &ProxyTargetTable {
        &self.table
    }

    /// Find the target responsible for `path`
    pub fn match_path(&self, path: &str) -> Option<ProxyMatch<'_>> {
        self.table.match_path(path)
    }

    /// Build the upstream request for a matched target
    pub fn build_upstream_request(
        &self,
        matched: &ProxyMatch<'_>,
        method: Method,
        query: Option<&str>,
        incoming: &HeaderMap,
        body: RelayBody,
    ) -> RelayedRequest {
        let target = matched.target;

        let mut url = format!("{}{}", target.base_url, matched.remainder);
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }

        let mut headers = HeaderMap::new();
        for name in FORWARDED_REQUEST_HEADERS.iter() {
            if let Some(value) = incoming.get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        if !self.change_origin {
            if let Some(host) = incoming.get(header::HOST) {
                headers.insert(header::HOST, host.clone());
            }
        }

        let credential = target
            .static_credential
            .as_ref()
            .map(|secret| secret.expose().to_string())
            .or_else(|| access_token_from_headers(incoming));

        if let Some(token) = credential {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => {
                    warn!(prefix = %target.prefix, "Credential is not a valid header value, Authorization omitted");
                }
            }
        }

        for (name, value) in target.extra_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        RelayedRequest {
            method,
            url,
            headers,
            body,
        }
    }

    /// Send a request upstream and materialize the response
    pub async fn dispatch(
        &self,
        prefix: &str,
        request: RelayedRequest,
    ) -> Result<RelayedResponse, ProxyError> {
        let has_body = !request.body.is_empty();
        let body = request.body.into_bytes();

        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .headers(request.headers)
            .timeout(self.timeout);
        if has_body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_upstream_error(prefix, e))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        if headers.remove(header::CONTENT_ENCODING).is_some() {
            headers.remove(header::CONTENT_LENGTH);
        }
        for name in STRIPPED_RESPONSE_HEADERS.iter() {
            headers.remove(name);
        }

        let kind = BodyKind::for_response(
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_upstream_error(prefix, e))?;

        Ok(RelayedResponse {
            status,
            headers,
            body: RelayBody::materialize(kind, bytes),
        })
    }

    /// Relay a whole inbound request to the matched target
    pub async fn relay(
        &self,
        matched: ProxyMatch<'_>,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let prefix = matched.target.prefix.as_str();

        let bytes = read_body(body, self.max_body_bytes).await?;
        let kind = BodyKind::for_request(
            parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );

        let upstream = self.build_upstream_request(
            &matched,
            parts.method,
            parts.uri.query(),
            &parts.headers,
            RelayBody::materialize(kind, bytes),
        );

        if self.debug {
            debug!(
                prefix = %prefix,
                method = %upstream.method,
                url = %upstream.url,
                headers = ?upstream.headers,
                body_kind = ?upstream.body.kind(),
                "Proxying request"
            );
        }

        let response = self.dispatch(prefix, upstream).await?;

        if self.debug {
            debug!(
                prefix = %prefix,
                status = response.status.as_u16(),
                headers = ?response.headers,
                "Proxy response"
            );
        }

        Ok(response.into_response())
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        let inner = err.into_inner();
        if inner.is::<LengthLimitError>() {
            ProxyError::BodyTooLarge(limit)
        } else {
            ProxyError::BodyRead(inner.to_string())
        }
    })
}

fn classify_upstream_error(prefix: &str, err: reqwest::Error) -> ProxyError {
    warn!(prefix = %prefix, error = %err, "Upstream request failed");

    if err.is_timeout() {
        ProxyError::UpstreamTimeout(prefix.to_string())
    } else if err.is_builder() {
        ProxyError::InvalidUpstreamUrl(prefix.to_string())
    } else {
        ProxyError::UpstreamUnreachable(prefix.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{MatchMode, ProxyTarget};

    fn router(change_origin: bool) -> ProxyRouter {
        let mut cms = ProxyTarget::new("/cmsproxy", "https://cms.example.com");
        cms.extra_headers
            .insert("x-gateway", HeaderValue::from_static("sessiongate"));

        let config = ProxyConfig {
            change_origin,
            match_mode: MatchMode::Substring,
            targets: vec![
                ProxyTarget::new("/aiproxy", "https://ai.example.com:8000").with_credential("ai-key"),
                cms,
            ],
            ..ProxyConfig::default()
        };
        ProxyRouter::new(&config).unwrap()
    }

    fn incoming() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("test-agent"));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("de-DE"));
        headers.insert(header::HOST, HeaderValue::from_static("www.example.com"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("access_token=user-token; circles=%5B%5D"),
        );
        headers.insert("x-internal-secret", HeaderValue::from_static("do-not-leak"));
        headers
    }

    #[test]
    fn test_build_request_uses_session_token() {
        let router = router(true);
        let matched = router.match_path("/cmsproxy/items/42").unwrap();

        let request = router.build_upstream_request(
            &matched,
            Method::GET,
            Some("x=1"),
            &incoming(),
            RelayBody::Empty,
        );

        assert_eq!(request.url, "https://cms.example.com/items/42?x=1");
        assert_eq!(request.headers.get(header::AUTHORIZATION).unwrap(), "Bearer user-token");
        assert_eq!(request.headers.get(header::ACCEPT).unwrap(), "application/json");
        assert_eq!(request.headers.get(header::USER_AGENT).unwrap(), "test-agent");
        assert_eq!(request.headers.get("x-gateway").unwrap(), "sessiongate");
        assert!(request.headers.get(header::COOKIE).is_none());
        assert!(request.headers.get(header::HOST).is_none());
        assert!(request.headers.get("x-internal-secret").is_none());
    }

    #[test]
    fn test_static_credential_takes_precedence() {
        let router = router(true);
        let matched = router.match_path("/aiproxy/search").unwrap();

        let request =
            router.build_upstream_request(&matched, Method::POST, None, &incoming(), RelayBody::Empty);

        assert_eq!(request.url, "https://ai.example.com:8000/search");
        assert_eq!(request.headers.get(header::AUTHORIZATION).unwrap(), "Bearer ai-key");
    }

    #[test]
    fn test_no_credential_no_authorization() {
        let router = router(true);
        let matched = router.match_path("/cmsproxy/assets/1").unwrap();
        let mut headers = incoming();
        headers.remove(header::COOKIE);

        let request =
            router.build_upstream_request(&matched, Method::GET, None, &headers, RelayBody::Empty);

        assert!(request.headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_host_forwarded_without_change_origin() {
        let router = router(false);
        let matched = router.match_path("/cmsproxy/items").unwrap();

        let request =
            router.build_upstream_request(&matched, Method::GET, None, &incoming(), RelayBody::Empty);

        assert_eq!(request.headers.get(header::HOST).unwrap(), "www.example.com");
    }

    #[test]
    fn test_authorization_is_redacted_in_debug_output() {
        let router = router(true);
        let matched = router.match_path("/aiproxy/x").unwrap();

        let request =
            router.build_upstream_request(&matched, Method::GET, None, &incoming(), RelayBody::Empty);

        assert!(!format!("{:?}", request.headers).contains("ai-key"));
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let err = read_body(Body::from(vec![0u8; 16]), 8).await.unwrap_err();
        assert!(matches!(err, ProxyError::BodyTooLarge(8)));

        let bytes = read_body(Body::from("hello"), 8).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }
}
