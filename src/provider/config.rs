//! Identity-provider configuration parsed from environment variables or a
//! backend outputs file.

use std::path::PathBuf;

use super::types::AuthError;

pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOCAL_CODE_TTL_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Remote,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for AuthTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_AUTH_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_AUTH_CONNECT_TIMEOUT_SECS }
    }
}

/// Settings for the managed user-pool backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub region: String,
    pub user_pool_id: Option<String>,
    pub client_id: String,
    /// Base URL of the user-pool API, without a trailing slash.
    pub endpoint: String,
    /// Where tokens are persisted for session recovery. Memory-only when `None`.
    pub token_file: Option<PathBuf>,
    pub timeouts: AuthTimeouts,
}

/// Settings for the file-backed demo provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    /// JSON store path. Memory-only when `None`.
    pub store_path: Option<PathBuf>,
    pub code_ttl_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { store_path: None, code_ttl_secs: DEFAULT_LOCAL_CODE_TTL_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    Remote(RemoteConfig),
    Local(LocalConfig),
}

impl AuthConfig {
    /// Build typed auth config from environment variables.
    ///
    /// - `AUTH_PROVIDER`: `remote` (default) or `local`
    ///
    /// Remote:
    /// - `AUTH_OUTPUTS_FILE`: backend outputs JSON (`auth.aws_region`,
    ///   `auth.user_pool_id`, `auth.user_pool_client_id`), or
    /// - `AUTH_REGION` + `AUTH_CLIENT_ID` (+ optional `AUTH_USER_POOL_ID`)
    /// - `AUTH_ENDPOINT`: overrides the regional endpoint
    /// - `AUTH_TOKEN_FILE`: token persistence path
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// Local:
    /// - `AUTH_LOCAL_STORE`: JSON store path
    /// - `AUTH_LOCAL_CODE_TTL_SECS`: default 900
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] when the remote backend has no
    /// settings, and [`AuthError::ConfigParse`] for malformed values.
    pub fn from_env() -> Result<Self, AuthError> {
        match parse_provider(std::env::var("AUTH_PROVIDER").ok().as_deref())? {
            ProviderKind::Remote => RemoteConfig::from_env().map(Self::Remote),
            ProviderKind::Local => Ok(Self::Local(LocalConfig::from_env())),
        }
    }
}

impl RemoteConfig {
    fn from_env() -> Result<Self, AuthError> {
        let base = if let Ok(path) = std::env::var("AUTH_OUTPUTS_FILE") {
            let raw = std::fs::read_to_string(&path).map_err(|e| AuthError::ConfigParse(format!("{path}: {e}")))?;
            Self::from_outputs_json(&raw)?
        } else {
            let region = non_empty_env("AUTH_REGION").ok_or(AuthError::NotConfigured)?;
            let client_id = non_empty_env("AUTH_CLIENT_ID").ok_or(AuthError::NotConfigured)?;
            Self::new(region, client_id, non_empty_env("AUTH_USER_POOL_ID"))
        };

        let endpoint = non_empty_env("AUTH_ENDPOINT")
            .map_or(base.endpoint, |url| url.trim_end_matches('/').to_owned());
        let timeouts = AuthTimeouts {
            request_secs: env_parse_u64("AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_AUTH_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_AUTH_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { endpoint, token_file: non_empty_env("AUTH_TOKEN_FILE").map(PathBuf::from), timeouts, ..base })
    }

    #[must_use]
    pub fn new(region: String, client_id: String, user_pool_id: Option<String>) -> Self {
        let endpoint = regional_endpoint(&region);
        Self { region, user_pool_id, client_id, endpoint, token_file: None, timeouts: AuthTimeouts::default() }
    }

    /// Parse the `auth` section of a backend outputs document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] when the document has no `auth`
    /// section and [`AuthError::ConfigParse`] when it is not valid JSON.
    pub fn from_outputs_json(raw: &str) -> Result<Self, AuthError> {
        let outputs: OutputsFile = serde_json::from_str(raw).map_err(|e| AuthError::ConfigParse(e.to_string()))?;
        let auth = outputs.auth.ok_or(AuthError::NotConfigured)?;
        if auth.aws_region.trim().is_empty() || auth.user_pool_client_id.trim().is_empty() {
            return Err(AuthError::NotConfigured);
        }
        Ok(Self::new(auth.aws_region, auth.user_pool_client_id, auth.user_pool_id))
    }
}

impl LocalConfig {
    fn from_env() -> Self {
        Self {
            store_path: non_empty_env("AUTH_LOCAL_STORE").map(PathBuf::from),
            code_ttl_secs: env_parse_u64("AUTH_LOCAL_CODE_TTL_SECS", DEFAULT_LOCAL_CODE_TTL_SECS),
        }
    }
}

#[derive(serde::Deserialize)]
struct OutputsFile {
    auth: Option<OutputsAuth>,
}

#[derive(serde::Deserialize)]
struct OutputsAuth {
    aws_region: String,
    user_pool_id: Option<String>,
    user_pool_client_id: String,
}

fn regional_endpoint(region: &str) -> String {
    format!("https://cognito-idp.{region}.amazonaws.com")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_provider(raw: Option<&str>) -> Result<ProviderKind, AuthError> {
    match raw.unwrap_or("remote") {
        "remote" => Ok(ProviderKind::Remote),
        "local" => Ok(ProviderKind::Local),
        other => Err(AuthError::ConfigParse(format!("unknown AUTH_PROVIDER: {other}"))),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
