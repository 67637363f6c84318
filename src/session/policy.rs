//! Route access policy

use crate::config::SessionConfig;
use regex::Regex;
use url::form_urlencoded;

/// Query parameter carrying the path a user was bounced from
pub const REDIRECTED_FROM_PARAM: &str = "redirectedFrom";

/// Decides which paths need an authenticated session
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    public_routes: Vec<String>,
    auth_workflow: Regex,
    share_path: Regex,
    share_key_param: String,
    sign_in_path: String,
}

impl From<&SessionConfig> for RoutePolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            public_routes: config.public_routes.clone(),
            auth_workflow: config.auth_workflow_pattern.clone(),
            share_path: config.share_path_pattern.clone(),
            share_key_param: config.share_key_param.clone(),
            sign_in_path: config.sign_in_path.clone(),
        }
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl RoutePolicy {
    /// The root path, or any path containing a public route marker
    ///
    /// Containment, not segment matching: `/docs/sign-in-help` is public too.
    pub fn is_public_route(&self, path: &str) -> bool {
        path == "/" || self.public_routes.iter().any(|route| path.contains(route.as_str()))
    }

    pub fn is_auth_workflow(&self, path: &str) -> bool {
        self.auth_workflow.is_match(path)
    }

    /// A single shared item opened with a share key
    pub fn is_shared_item_access(&self, path: &str, query: Option<&str>) -> bool {
        if !self.share_path.is_match(path) {
            return false;
        }

        query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .any(|(key, value)| key == self.share_key_param.as_str() && !value.is_empty())
            })
            .unwrap_or(false)
    }

    /// Whether an anonymous request for this path must be sent to sign-in
    pub fn requires_session(&self, path: &str, query: Option<&str>) -> bool {
        !self.is_public_route(path)
            && !self.is_auth_workflow(path)
            && !self.is_shared_item_access(path, query)
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// Sign-in location remembering `path` as the return target
    pub fn sign_in_redirect(&self, path: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(REDIRECTED_FROM_PARAM, path)
            .finish();
        format!("{}?{}", self.sign_in_path, query)
    }
}

/// Local path to send a user to after signing in
///
/// Only same-origin absolute paths are honoured; anything else falls back to `/`.
pub fn return_target(query: Option<&str>) -> String {
    query
        .and_then(|q| {
            form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == REDIRECTED_FROM_PARAM)
                .map(|(_, value)| value.into_owned())
        })
        .filter(|target| is_local_path(target))
        .unwrap_or_else(|| "/".to_string())
}

fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_routes() {
        let policy = RoutePolicy::default();
        assert!(policy.is_public_route("/"));
        assert!(policy.is_public_route("/auth/sign-in"));
        assert!(policy.is_public_route("/auth/password/reset"));
        assert!(policy.is_public_route("/imprint/privacypolicy"));
        assert!(!policy.is_public_route("/app/feed"));
        assert!(!policy.is_public_route(""));
    }

    #[test]
    fn test_public_routes_match_by_containment() {
        let policy = RoutePolicy::default();
        assert!(policy.is_public_route("/help/sign-up-faq"));
    }

    #[test]
    fn test_auth_workflow() {
        let policy = RoutePolicy::default();
        assert!(policy.is_auth_workflow("/auth/sign-out"));
        assert!(policy.is_auth_workflow("/auth/sign-up"));
        assert!(!policy.is_auth_workflow("/auth/profile"));
    }

    #[test]
    fn test_shared_item_access() {
        let policy = RoutePolicy::default();
        assert!(policy.is_shared_item_access("/app/42", Some("share_key=abc")));
        assert!(policy.is_shared_item_access("/app42", Some("x=1&share_key=abc")));
        assert!(!policy.is_shared_item_access("/app/42", Some("share_key=")));
        assert!(!policy.is_shared_item_access("/app/42", None));
        assert!(!policy.is_shared_item_access("/app/feed", Some("share_key=abc")));
    }

    #[test]
    fn test_requires_session() {
        let policy = RoutePolicy::default();
        assert!(policy.requires_session("/app/feed", None));
        assert!(!policy.requires_session("/", None));
        assert!(!policy.requires_session("/auth/sign-out", None));
        assert!(!policy.requires_session("/app/7", Some("share_key=k")));
    }

    #[test]
    fn test_sign_in_redirect_encodes_path() {
        let policy = RoutePolicy::default();
        assert_eq!(
            policy.sign_in_redirect("/app/feed"),
            "/auth/sign-in?redirectedFrom=%2Fapp%2Ffeed"
        );
    }

    #[test]
    fn test_return_target() {
        assert_eq!(return_target(Some("redirectedFrom=%2Fapp%2Ffeed")), "/app/feed");
        assert_eq!(return_target(Some("redirectedFrom=https%3A%2F%2Fevil.test")), "/");
        assert_eq!(return_target(Some("redirectedFrom=%2F%2Fevil.test")), "/");
        assert_eq!(return_target(Some("other=1")), "/");
        assert_eq!(return_target(None), "/");
    }
}
