//! Raw configuration types for TOML parsing

use super::*;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_IDENTITY_URL: &str = "http://127.0.0.1:8055";
pub const DEFAULT_CIRCLES_PATH: &str = "/items/circles?fields=circle_name,circle_id";
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 60 * 60 * 24 * 30;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_AUTH_WORKFLOW_PATTERN: &str = r"auth/sign-(in|out|up)";
pub const DEFAULT_SHARE_PATH_PATTERN: &str = r"/app/?\d+";

pub fn default_public_routes() -> Vec<String> {
    [
        "/sign-up",
        "/sign-in",
        "/password",
        "/imprint/termsofuse",
        "/imprint/privacypolicy",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub server: Option<RawServerConfig>,
    pub identity: Option<RawIdentityConfig>,
    pub session: Option<RawSessionConfig>,
    pub proxy: Option<RawProxyConfig>,
    pub logging: Option<RawLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawServerConfig {
    pub bind: Option<String>,
}

impl From<RawServerConfig> for ServerConfig {
    fn from(raw: RawServerConfig) -> Self {
        Self {
            bind: raw.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawIdentityConfig {
    pub base_url: Option<String>,
    pub refresh_path: Option<String>,
    pub login_path: Option<String>,
    pub circles_path: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl TryFrom<RawIdentityConfig> for IdentityConfig {
    type Error = ConfigError;

    fn try_from(raw: RawIdentityConfig) -> Result<Self, Self::Error> {
        let defaults = IdentityConfig::default();

        let base_url = match raw.base_url {
            Some(url) => validate_base_url(&url, "identity.base_url")?,
            None => defaults.base_url,
        };

        Ok(Self {
            base_url,
            refresh_path: raw.refresh_path.unwrap_or(defaults.refresh_path),
            login_path: raw.login_path.unwrap_or(defaults.login_path),
            circles_path: raw.circles_path.unwrap_or(defaults.circles_path),
            timeout: raw
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawSessionConfig {
    pub expiration_buffer_secs: Option<i64>,
    pub refresh_token_ttl_secs: Option<i64>,
    pub sign_in_path: Option<String>,
    pub public_routes: Option<Vec<String>>,
    pub auth_workflow_pattern: Option<String>,
    pub share_path_pattern: Option<String>,
    pub share_key_param: Option<String>,
    pub secure_cookies: Option<bool>,
    pub same_site: Option<String>,
    pub cookie_domain: Option<String>,
    pub token_secret: Option<String>,
    pub refresh_grace_secs: Option<u64>,
}

impl TryFrom<RawSessionConfig> for SessionConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSessionConfig) -> Result<Self, Self::Error> {
        let defaults = SessionConfig::default();

        let compile = |pattern: Option<String>, field: &str, default: Regex| match pattern {
            Some(p) => Regex::new(&p)
                .map_err(|e| ConfigError::Invalid(format!("session.{}: {}", field, e))),
            None => Ok(default),
        };

        let same_site = match raw.same_site.as_deref() {
            Some("strict") => SameSite::Strict,
            Some("lax") | None => SameSite::Lax,
            Some("none") => SameSite::None,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown same_site policy: {}",
                    other
                )))
            }
        };

        let expiration_buffer_secs = raw
            .expiration_buffer_secs
            .unwrap_or(defaults.expiration_buffer_secs);
        if expiration_buffer_secs < 0 {
            return Err(ConfigError::Invalid(
                "session.expiration_buffer_secs must not be negative".to_string(),
            ));
        }

        let sign_in_path = raw.sign_in_path.unwrap_or(defaults.sign_in_path);
        if !sign_in_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "session.sign_in_path must start with '/'".to_string(),
            ));
        }

        Ok(Self {
            expiration_buffer_secs,
            refresh_token_ttl_secs: raw
                .refresh_token_ttl_secs
                .unwrap_or(defaults.refresh_token_ttl_secs),
            sign_in_path,
            public_routes: raw.public_routes.unwrap_or(defaults.public_routes),
            auth_workflow_pattern: compile(
                raw.auth_workflow_pattern,
                "auth_workflow_pattern",
                defaults.auth_workflow_pattern,
            )?,
            share_path_pattern: compile(
                raw.share_path_pattern,
                "share_path_pattern",
                defaults.share_path_pattern,
            )?,
            share_key_param: raw.share_key_param.unwrap_or(defaults.share_key_param),
            secure_cookies: raw.secure_cookies.unwrap_or(defaults.secure_cookies),
            same_site,
            cookie_domain: raw.cookie_domain.filter(|d| !d.is_empty()),
            token_secret: raw.token_secret.filter(|s| !s.is_empty()).map(Secret::new),
            refresh_grace: raw
                .refresh_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_grace),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawProxyConfig {
    pub change_origin: Option<bool>,
    pub debug: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub match_mode: Option<String>,
    #[serde(default)]
    pub targets: Vec<RawProxyTarget>,
}

impl TryFrom<RawProxyConfig> for ProxyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawProxyConfig) -> Result<Self, Self::Error> {
        let defaults = ProxyConfig::default();

        let match_mode = match raw.match_mode.as_deref() {
            Some("substring") | None => MatchMode::Substring,
            Some("segment") => MatchMode::Segment,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown proxy match_mode: {}",
                    other
                )))
            }
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(raw.targets.len());
        for raw_target in raw.targets {
            let target: ProxyTarget = raw_target.try_into()?;
            if !seen.insert(target.prefix.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate proxy prefix: {}",
                    target.prefix
                )));
            }
            targets.push(target);
        }

        Ok(Self {
            change_origin: raw.change_origin.unwrap_or(defaults.change_origin),
            debug: raw.debug.unwrap_or(defaults.debug),
            timeout: raw
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_body_bytes: raw.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            match_mode,
            targets,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawProxyTarget {
    pub prefix: String,
    pub target: String,
    pub credential: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl TryFrom<RawProxyTarget> for ProxyTarget {
    type Error = ConfigError;

    fn try_from(raw: RawProxyTarget) -> Result<Self, Self::Error> {
        if raw.prefix.is_empty() || !raw.prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "Proxy prefix must start with '/': {:?}",
                raw.prefix
            )));
        }

        let base_url = validate_base_url(&raw.target, &raw.prefix)?;

        let mut extra_headers = HeaderMap::new();
        for (name, value) in raw.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::Invalid(format!("{}: invalid header name {:?}", raw.prefix, name))
            })?;
            let header_value = HeaderValue::from_str(&value).map_err(|_| {
                ConfigError::Invalid(format!("{}: invalid value for header {}", raw.prefix, name))
            })?;
            extra_headers.insert(header_name, header_value);
        }

        Ok(ProxyTarget {
            prefix: raw.prefix,
            base_url,
            static_credential: raw.credential.filter(|c| !c.is_empty()).map(Secret::new),
            extra_headers,
        })
    }
}

/// Check that a base URL is absolute http(s) and drop a trailing slash
fn validate_base_url(value: &str, context: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{}: invalid URL {:?}: {}", context, value, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ConfigError::Invalid(format!(
                "{}: URL scheme '{}' not allowed",
                context, scheme
            )))
        }
    }

    Ok(value.trim_end_matches('/').to_string())
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl From<RawLoggingConfig> for LoggingConfig {
    fn from(raw: RawLoggingConfig) -> Self {
        Self {
            level: raw.level.unwrap_or_else(|| "info".to_string()),
            format: match raw.format.as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}
