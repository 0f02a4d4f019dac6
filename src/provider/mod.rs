//! Identity providers: adapters for the external authentication backend.
//!
//! DESIGN
//! ======
//! `ProviderClient` dispatches to the managed user-pool backend or the
//! file-backed demo backend based on `AUTH_PROVIDER`. When no backend is
//! configured the client still exists, but every call fails with
//! [`AuthError::NotConfigured`] so the app can boot signed out.

pub mod config;
pub mod credentials;
pub mod local;
pub mod remote;
pub mod types;

use config::AuthConfig;
use tracing::{info, warn};
pub use types::{AuthError, IdentityProvider};
use types::{AttributeMap, Identity, ResetPasswordOutcome, SignInOutcome, SignUpOutcome};

// =============================================================================
// CLIENT DISPATCH
// =============================================================================

pub enum ProviderClient {
    Remote(remote::RemoteProvider),
    Local(local::LocalProvider),
    Unconfigured,
}

impl ProviderClient {
    /// Build a provider client from environment variables.
    ///
    /// A missing backend is not an error: the client comes back
    /// [`ProviderClient::Unconfigured`].
    ///
    /// # Errors
    ///
    /// Returns an error for malformed config, an unreadable demo store, or
    /// an HTTP client that fails to build.
    pub async fn from_env() -> Result<Self, AuthError> {
        match AuthConfig::from_env() {
            Ok(config) => Self::from_config(config).await,
            Err(AuthError::NotConfigured) => {
                warn!("auth backend not configured: credential operations disabled");
                Ok(Self::Unconfigured)
            }
            Err(e) => Err(e),
        }
    }

    /// Build a provider client from a parsed typed config.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to initialize.
    pub async fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        match config {
            AuthConfig::Remote(remote) => {
                info!(region = %remote.region, endpoint = %remote.endpoint, "user pool provider initialized");
                Ok(Self::Remote(remote::RemoteProvider::new(remote).await?))
            }
            AuthConfig::Local(local) => {
                let store = local
                    .store_path
                    .as_ref()
                    .map_or_else(|| "<memory>".to_owned(), |p| p.display().to_string());
                info!(%store, "demo auth provider initialized");
                Ok(Self::Local(local::LocalProvider::open(&local).await?))
            }
        }
    }

    /// Name of the active backend, for logs and the CLI.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Local(_) => "local",
            Self::Unconfigured => "unconfigured",
        }
    }

    fn backend(&self) -> Result<&dyn IdentityProvider, AuthError> {
        match self {
            Self::Remote(p) => Ok(p),
            Self::Local(p) => Ok(p),
            Self::Unconfigured => Err(AuthError::NotConfigured),
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for ProviderClient {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &AttributeMap,
    ) -> Result<SignUpOutcome, AuthError> {
        self.backend()?.sign_up(username, password, attributes).await
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), AuthError> {
        self.backend()?.confirm_sign_up(username, code).await
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        self.backend()?.sign_in(username, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.backend()?.sign_out().await
    }

    async fn current_user(&self) -> Result<Identity, AuthError> {
        self.backend()?.current_user().await
    }

    async fn fetch_user_attributes(&self) -> Result<AttributeMap, AuthError> {
        self.backend()?.fetch_user_attributes().await
    }

    async fn reset_password(&self, username: &str) -> Result<ResetPasswordOutcome, AuthError> {
        self.backend()?.reset_password(username).await
    }

    async fn confirm_reset_password(&self, username: &str, code: &str, new_password: &str) -> Result<(), AuthError> {
        self.backend()?
            .confirm_reset_password(username, code, new_password)
            .await
    }

    async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        self.backend()?
            .update_password(old_password, new_password)
            .await
    }

    async fn update_user_attributes(&self, attributes: &AttributeMap) -> Result<(), AuthError> {
        self.backend()?.update_user_attributes(attributes).await
    }

    fn is_configured(&self) -> bool {
        !matches!(self, Self::Unconfigured)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
