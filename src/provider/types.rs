//! Identity-provider types: provider-neutral outcomes, errors, and the
//! `IdentityProvider` trait shared by the remote and local backends.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw user attributes as reported by the provider (`email`, `name`, `sub`, ...).
pub type AttributeMap = BTreeMap<String, String>;

// =============================================================================
// ERROR
// =============================================================================

/// Rejection codes shared by every backend. Names follow the user-pool
/// exception names so callers can match on one vocabulary.
pub mod codes {
    pub const USERNAME_EXISTS: &str = "UsernameExistsException";
    pub const USER_NOT_FOUND: &str = "UserNotFoundException";
    pub const USER_NOT_CONFIRMED: &str = "UserNotConfirmedException";
    pub const NOT_AUTHORIZED: &str = "NotAuthorizedException";
    pub const CODE_MISMATCH: &str = "CodeMismatchException";
    pub const EXPIRED_CODE: &str = "ExpiredCodeException";
    pub const INVALID_PASSWORD: &str = "InvalidPasswordException";
    pub const INVALID_PARAMETER: &str = "InvalidParameterException";
    pub const PASSWORD_RESET_REQUIRED: &str = "PasswordResetRequiredException";
    /// Sign-in challenge this crate cannot complete (MFA, custom auth).
    pub const UNSUPPORTED_CHALLENGE: &str = "UnsupportedChallengeException";
}

/// Errors produced by identity-provider operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No backend settings were found; credential operations cannot run.
    #[error("auth backend is not configured")]
    NotConfigured,

    /// There is no signed-in user. Expected during session recovery.
    #[error("no signed-in user")]
    NoSession,

    /// The provider rejected the request. The message is passed through verbatim.
    #[error("{message}")]
    Rejected { code: String, message: String },

    /// The HTTP request to the provider failed.
    #[error("auth request failed: {0}")]
    Request(String),

    /// The provider returned a non-success status without a recognizable error body.
    #[error("auth response error: status {status}")]
    Response { status: u16, body: String },

    /// The provider response body could not be deserialized.
    #[error("auth response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// A configuration value could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(String),

    /// Reading or writing the on-disk credential store failed.
    #[error("credential store error: {0}")]
    Storage(String),
}

impl AuthError {
    #[must_use]
    pub fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self::Rejected { code: code.to_owned(), message: message.into() }
    }

    /// Provider rejection code, if this is a rejection.
    #[must_use]
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_NOT_CONFIGURED",
            Self::NoSession => "E_NO_SESSION",
            Self::Rejected { .. } => "E_REJECTED",
            Self::Request(_) => "E_AUTH_REQUEST",
            Self::Response { .. } => "E_AUTH_RESPONSE",
            Self::Parse(_) => "E_AUTH_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::ConfigParse(_) => "E_CONFIG_PARSE",
            Self::Storage(_) => "E_STORAGE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Identity of the signed-in user as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque, stable user id (the `sub` attribute on user pools).
    pub user_id: String,
    /// Login name. Email for every flow in this crate.
    pub username: String,
}

/// Where a confirmation or reset code was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDelivery {
    /// Masked destination, e.g. `u***@e***.com`.
    pub destination: String,
    /// Delivery medium, e.g. `EMAIL`.
    pub medium: String,
    /// Attribute the code verifies, e.g. `email`.
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SignUpStep {
    ConfirmSignUp { delivery: Option<CodeDelivery> },
    Done,
}

/// Result of a sign-up. The user is not signed in yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignUpOutcome {
    pub user_id: Option<String>,
    pub is_complete: bool,
    pub next_step: SignUpStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInStep {
    Done,
    ConfirmSignUp,
    ResetPassword,
    NewPasswordRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignInOutcome {
    pub is_signed_in: bool,
    pub next_step: SignInStep,
}

impl SignInOutcome {
    #[must_use]
    pub fn signed_in() -> Self {
        Self { is_signed_in: true, next_step: SignInStep::Done }
    }

    #[must_use]
    pub fn pending(next_step: SignInStep) -> Self {
        Self { is_signed_in: false, next_step }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetPasswordOutcome {
    pub delivery: Option<CodeDelivery>,
}

// =============================================================================
// IDENTITY PROVIDER TRAIT
// =============================================================================

/// Provider-neutral async contract consumed by the session service.
/// Enables mocking in tests.
///
/// Every call is an opaque remote operation that may fail for network,
/// validation, or policy reasons. Implementations report rejections as
/// [`AuthError::Rejected`] and a missing session as [`AuthError::NoSession`].
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new user. Returns a pending identity awaiting confirmation.
    async fn sign_up(&self, username: &str, password: &str, attributes: &AttributeMap)
    -> Result<SignUpOutcome, AuthError>;

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), AuthError>;

    async fn sign_in(&self, username: &str, password: &str) -> Result<SignInOutcome, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Identity of the current session, or [`AuthError::NoSession`].
    async fn current_user(&self) -> Result<Identity, AuthError>;

    async fn fetch_user_attributes(&self) -> Result<AttributeMap, AuthError>;

    async fn reset_password(&self, username: &str) -> Result<ResetPasswordOutcome, AuthError>;

    async fn confirm_reset_password(&self, username: &str, code: &str, new_password: &str) -> Result<(), AuthError>;

    async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError>;

    async fn update_user_attributes(&self, attributes: &AttributeMap) -> Result<(), AuthError>;

    /// `false` when no backend settings are present.
    fn is_configured(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
