//! Typed access to the session cookies of a request

use super::circles::Circle;
use crate::config::SessionConfig;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const CIRCLES_COOKIE: &str = "circles";

/// Tokens issued by the identity endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in milliseconds
    #[serde(rename = "expires")]
    pub expires_ms: u64,
}

/// Attributes applied to every session cookie
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
    pub refresh_token_ttl_secs: i64,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for CookiePolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            secure: config.secure_cookies,
            same_site: config.same_site,
            domain: config.cookie_domain.clone(),
            refresh_token_ttl_secs: config.refresh_token_ttl_secs,
        }
    }
}

/// Read the caller's access token straight from request headers
pub fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(ACCESS_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Credential store over the request cookie jar
///
/// Reads see the values written during this request, so a refreshed token is
/// visible to later steps before the response goes out.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    jar: CookieJar,
    policy: CookiePolicy,
    modified: bool,
}

impl CredentialStore {
    pub fn new(jar: CookieJar, policy: CookiePolicy) -> Self {
        Self {
            jar,
            policy,
            modified: false,
        }
    }

    pub fn from_headers(headers: &HeaderMap, policy: CookiePolicy) -> Self {
        Self::new(CookieJar::from_headers(headers), policy)
    }

    pub fn access_token(&self) -> Option<String> {
        self.non_empty(ACCESS_TOKEN_COOKIE)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.non_empty(REFRESH_TOKEN_COOKIE)
    }

    /// Circles the user belongs to; a missing or malformed cookie yields none
    pub fn circles(&self) -> Vec<Circle> {
        self.jar
            .get(CIRCLES_COOKIE)
            .and_then(|c| serde_json::from_str(c.value()).ok())
            .unwrap_or_default()
    }

    /// Store a freshly issued token pair
    pub fn store_tokens(&mut self, tokens: &TokenPair) {
        let access_max_age = (tokens.expires_ms / 1000) as i64;
        let refresh_max_age = self.policy.refresh_token_ttl_secs;

        let access = self.build(ACCESS_TOKEN_COOKIE, tokens.access_token.clone(), true, access_max_age);
        let refresh = self.build(REFRESH_TOKEN_COOKIE, tokens.refresh_token.clone(), true, refresh_max_age);
        self.update(|jar| jar.add(access).add(refresh));
    }

    /// Store the user's circles as an authorization hint
    pub fn store_circles(&mut self, circles: &[Circle]) {
        let value = serde_json::to_string(circles).unwrap_or_else(|_| "[]".to_string());
        // read by client scripts, so not HttpOnly
        let cookie = self.build(CIRCLES_COOKIE, value, false, self.policy.refresh_token_ttl_secs);
        self.update(|jar| jar.add(cookie));
    }

    /// Drop both tokens
    pub fn clear_tokens(&mut self) {
        let access = self.removal(ACCESS_TOKEN_COOKIE);
        let refresh = self.removal(REFRESH_TOKEN_COOKIE);
        self.update(|jar| jar.remove(access).remove(refresh));
    }

    /// Drop every session cookie
    pub fn clear_all(&mut self) {
        self.clear_tokens();
        let circles = self.removal(CIRCLES_COOKIE);
        self.update(|jar| jar.remove(circles));
    }

    /// Whether this request changed any session cookie
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `Cookie` header value reflecting the current state of the jar
    pub fn request_cookie_header(&self) -> String {
        self.jar
            .iter()
            .map(|c| c.encoded().stripped().to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar
    }

    fn non_empty(&self, name: &str) -> Option<String> {
        self.jar
            .get(name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn build(&self, name: &'static str, value: String, http_only: bool, max_age_secs: i64) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, value))
            .path("/")
            .http_only(http_only)
            .secure(self.policy.secure)
            .same_site(self.policy.same_site)
            .max_age(time::Duration::seconds(max_age_secs))
            .build();
        if let Some(domain) = &self.policy.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    fn removal(&self, name: &'static str) -> Cookie<'static> {
        let mut cookie = Cookie::build(name).path("/").build();
        if let Some(domain) = &self.policy.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    fn update(&mut self, f: impl FnOnce(CookieJar) -> CookieJar) {
        let jar = std::mem::replace(&mut self.jar, CookieJar::new());
        self.jar = f(jar);
        self.modified = true;
    }
}
