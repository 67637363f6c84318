//! Configuration system for Sessiongate
//!
//! Loads configuration from TOML files. `${VAR}` and `${VAR:-default}`
//! placeholders are substituted from the environment before parsing, which is
//! how upstream base URLs and static credentials reach the proxy table.

mod types;

pub use types::*;

use crate::proxy::{MatchMode, ProxyTarget};
use crate::Secret;
use axum_extra::extract::cookie::SameSite;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main Sessiongate configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,
    /// Identity (CMS auth) endpoint configuration
    pub identity: IdentityConfig,
    /// Session lifecycle policy
    pub session: SessionConfig,
    /// Proxy target table and relay options
    pub proxy: ProxyConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string, resolving placeholders from the process environment
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::parse_with_env(content, |name| std::env::var(name).ok())
    }

    /// Load configuration from a string with a custom environment lookup
    pub fn parse_with_env<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = interpolate_env(content, lookup)?;
        let raw: RawConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            server: raw.server.unwrap_or_default().into(),
            identity: raw.identity.unwrap_or_default().try_into()?,
            session: raw.session.unwrap_or_default().try_into()?,
            proxy: raw.proxy.unwrap_or_default().try_into()?,
            logging: raw.logging.unwrap_or_default().into(),
        })
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            identity: IdentityConfig::default(),
            session: SessionConfig::default(),
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sessiongate")
            .join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("static regex")
    })
}

/// Substitute `${VAR}` and `${VAR:-default}` placeholders
///
/// Comment lines are left alone. Environment values are escaped for a TOML
/// basic string, so quotes and backslashes in a credential cannot end the
/// string early. Defaults are written by the config author and used as is.
pub fn interpolate_env<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    let mut result = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            continue;
        }

        let replaced = placeholder_regex().replace_all(line, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match (lookup(name), caps.get(2)) {
                (Some(value), _) => escape_toml(&value),
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });
        result.push_str(&replaced);
    }

    if !missing.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "Unset environment variable(s): {}",
            missing.join(", ")
        )));
    }

    Ok(result)
}

fn escape_toml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04X}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Identity endpoint configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Base URL of the content backend that issues tokens
    pub base_url: String,
    /// Path of the refresh exchange
    pub refresh_path: String,
    /// Path of the password login exchange
    pub login_path: String,
    /// Path (with query) listing the circles of the authenticated user
    pub circles_path: String,
    /// Timeout for identity calls
    pub timeout: Duration,
}

impl IdentityConfig {
    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url, self.refresh_path)
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.login_path)
    }

    pub fn circles_url(&self) -> String {
        format!("{}{}", self.base_url, self.circles_path)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_IDENTITY_URL.to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/login".to_string(),
            circles_path: DEFAULT_CIRCLES_PATH.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Session lifecycle policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A token expiring within this many seconds counts as expired
    pub expiration_buffer_secs: i64,
    /// Max-age of the refresh token cookie
    pub refresh_token_ttl_secs: i64,
    /// Where anonymous users are sent
    pub sign_in_path: String,
    /// Substrings marking a path as public
    pub public_routes: Vec<String>,
    /// Paths belonging to the sign-in/out/up workflow
    pub auth_workflow_pattern: Regex,
    /// Paths addressing a single shareable item
    pub share_path_pattern: Regex,
    /// Query parameter carrying a share key
    pub share_key_param: String,
    /// Mark session cookies `Secure`
    pub secure_cookies: bool,
    /// SameSite policy of session cookies
    pub same_site: SameSite,
    /// Optional cookie domain
    pub cookie_domain: Option<String>,
    /// HS256 secret for access-token verification; claims are decoded unverified when absent
    pub token_secret: Option<Secret>,
    /// How long a refresh outcome is shared with concurrent requests
    pub refresh_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiration_buffer_secs: 0,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            sign_in_path: "/auth/sign-in".to_string(),
            public_routes: default_public_routes(),
            auth_workflow_pattern: Regex::new(DEFAULT_AUTH_WORKFLOW_PATTERN).expect("static regex"),
            share_path_pattern: Regex::new(DEFAULT_SHARE_PATH_PATTERN).expect("static regex"),
            share_key_param: "share_key".to_string(),
            secure_cookies: false,
            same_site: SameSite::Lax,
            cookie_domain: None,
            token_secret: None,
            refresh_grace: Duration::from_secs(30),
        }
    }
}

/// Proxy relay options and target table
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// When false the caller's Host header is forwarded upstream
    pub change_origin: bool,
    /// Log outbound requests at debug level
    pub debug: bool,
    /// Deadline for a single upstream round trip
    pub timeout: Duration,
    /// Largest request body accepted for relay
    pub max_body_bytes: usize,
    /// How prefixes are matched against paths
    pub match_mode: MatchMode,
    /// Ordered targets, first match wins
    pub targets: Vec<ProxyTarget>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            change_origin: true,
            debug: false,
            timeout: Duration::from_secs(30),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            match_mode: MatchMode::Substring,
            targets: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Format: "json" or "pretty"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}

/// Annotated configuration written by `sessiongate init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Sessiongate configuration
#
# ${VAR} and ${VAR:-default} are replaced from the environment.

[server]
bind = "127.0.0.1:3000"

[identity]
base_url = "${PUBLIC_CMS_URL:-http://127.0.0.1:8055}"

[session]
expiration_buffer_secs = 0
sign_in_path = "/auth/sign-in"
secure_cookies = false
same_site = "lax"

[proxy]
change_origin = true
debug = false
timeout_secs = 30

# Targets are matched in order; the first prefix found in the path wins.
[[proxy.targets]]
prefix = "/aiproxy"
target = "${PUBLIC_AI_SERVER_URL:-http://127.0.0.1}:${PUBLIC_AI_SERVER_PORT:-8000}"
credential = "${AI_API_KEY:-}"

[[proxy.targets]]
prefix = "/cmsproxy"
target = "${PUBLIC_CMS_URL:-http://127.0.0.1:8055}"

[logging]
level = "info"
format = "pretty"
"#;
