//! Proxy target table and path matching

use crate::Secret;
use axum::http::HeaderMap;

/// How a configured prefix is located in a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Prefix may occur anywhere in the path; the remainder follows its first occurrence
    Substring,
    /// Prefix must start the path and end on a segment boundary
    Segment,
}

/// An upstream origin reachable through the gateway
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    /// Route match key (e.g. `/cmsproxy`)
    pub prefix: String,
    /// Upstream base URL without trailing slash
    pub base_url: String,
    /// Bearer token injected instead of the caller's session token
    pub static_credential: Option<Secret>,
    /// Static headers added to every upstream request
    pub extra_headers: HeaderMap,
}

impl ProxyTarget {
    /// Create a target without credential or extra headers
    pub fn new(prefix: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            base_url: base_url.into(),
            static_credential: None,
            extra_headers: HeaderMap::new(),
        }
    }

    /// Attach a static bearer credential
    pub fn with_credential(mut self, credential: impl Into<Secret>) -> Self {
        self.static_credential = Some(credential.into());
        self
    }
}

/// A matched target and the part of the path left after the prefix
#[derive(Debug, Clone)]
pub struct ProxyMatch<'a> {
    pub target: &'a ProxyTarget,
    pub remainder: String,
}

/// Ordered prefix table, first match wins
#[derive(Debug, Clone)]
pub struct ProxyTargetTable {
    targets: Vec<ProxyTarget>,
    mode: MatchMode,
}

impl ProxyTargetTable {
    pub fn new(targets: Vec<ProxyTarget>, mode: MatchMode) -> Self {
        Self { targets, mode }
    }

    /// Find the first target whose prefix matches `path`
    pub fn match_path(&self, path: &str) -> Option<ProxyMatch<'_>> {
        self.targets.iter().find_map(|target| {
            locate(path, &target.prefix, self.mode).map(|remainder| ProxyMatch {
                target,
                remainder: remainder.to_string(),
            })
        })
    }

    pub fn targets(&self) -> &[ProxyTarget] {
        &self.targets
    }

}

fn locate<'p>(path: &'p str, prefix: &str, mode: MatchMode) -> Option<&'p str> {
    match mode {
        // a bare prefix leaves nothing to forward and falls through to the next target
        MatchMode::Substring => path
            .find(prefix)
            .map(|start| &path[start + prefix.len()..])
            .filter(|rest| !rest.is_empty()),
        MatchMode::Segment => {
            let rest = path.strip_prefix(prefix)?;
            if rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/') {
                Some(rest)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(mode: MatchMode) -> ProxyTargetTable {
        ProxyTargetTable::new(
            vec![
                ProxyTarget::new("/aiproxy", "https://ai.example.com").with_credential("ai-key"),
                ProxyTarget::new("/cmsproxy", "https://cms.example.com"),
            ],
            mode,
        )
    }

    #[test]
    fn test_substring_match() {
        let table = table(MatchMode::Substring);

        let m = table.match_path("/cmsproxy/items/42").unwrap();
        assert_eq!(m.target.prefix, "/cmsproxy");
        assert_eq!(m.remainder, "/items/42");

        let m = table.match_path("/aiproxy/search").unwrap();
        assert_eq!(m.target.prefix, "/aiproxy");
        assert_eq!(m.remainder, "/search");

        assert!(table.match_path("/app/feed").is_none());
    }

    #[test]
    fn test_substring_matches_mid_path() {
        let table = table(MatchMode::Substring);

        // observed behavior: the prefix need not lead the path
        let m = table.match_path("/de/cmsproxy/files/1").unwrap();
        assert_eq!(m.remainder, "/files/1");

        // remainder follows the first occurrence only
        let m = table.match_path("/cmsproxy/a/cmsproxy/b").unwrap();
        assert_eq!(m.remainder, "/a/cmsproxy/b");
    }

    #[test]
    fn test_bare_prefix_falls_through() {
        let table = table(MatchMode::Substring);
        assert!(table.match_path("/cmsproxy").is_none());

        // a later target still gets its chance
        let table = ProxyTargetTable::new(
            vec![
                ProxyTarget::new("/files", "https://files.example.com"),
                ProxyTarget::new("/cmsproxy", "https://cms.example.com"),
            ],
            MatchMode::Substring,
        );
        let m = table.match_path("/cmsproxy/files").unwrap();
        assert_eq!(m.target.base_url, "https://cms.example.com");
        assert_eq!(m.remainder, "/files");
    }

    #[test]
    fn test_first_match_wins() {
        let table = ProxyTargetTable::new(
            vec![
                ProxyTarget::new("/proxy/special", "https://special.example.com"),
                ProxyTarget::new("/proxy", "https://general.example.com"),
            ],
            MatchMode::Substring,
        );

        let m = table.match_path("/proxy/special/x").unwrap();
        assert_eq!(m.target.base_url, "https://special.example.com");
        assert_eq!(m.remainder, "/x");

        let m = table.match_path("/proxy/other").unwrap();
        assert_eq!(m.target.base_url, "https://general.example.com");
    }

    #[test]
    fn test_segment_match() {
        let table = table(MatchMode::Segment);

        let m = table.match_path("/cmsproxy/items").unwrap();
        assert_eq!(m.remainder, "/items");

        let m = table.match_path("/cmsproxy").unwrap();
        assert_eq!(m.remainder, "");

        assert!(table.match_path("/cmsproxyextra/items").is_none());
        assert!(table.match_path("/de/cmsproxy/items").is_none());
    }
}
