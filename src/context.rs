//! Application context handed to every consumer of the session.
//!
//! DESIGN
//! ======
//! The context is built once at startup and cloned into whatever needs it.
//! Clones share the same session record and provider, so there is no global
//! instance and tests can build as many independent contexts as they like.

use std::sync::Arc;

use tracing::info;

use crate::provider::{AuthError, IdentityProvider, ProviderClient};
use crate::services::session::SessionService;

#[derive(Clone)]
pub struct AuthContext {
    pub session: SessionService,
    backend: &'static str,
}

impl AuthContext {
    /// Wrap an arbitrary provider. Used by tests and embedders with their own backend.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { session: SessionService::new(provider), backend: "custom" }
    }

    #[must_use]
    pub fn from_client(client: ProviderClient) -> Self {
        let backend = client.kind();
        Self { session: SessionService::new(Arc::new(client)), backend }
    }

    /// Build the context from environment variables. A missing backend
    /// yields a context whose credential operations fail with
    /// [`AuthError::NotConfigured`].
    ///
    /// # Errors
    ///
    /// Returns an error if backend configuration is present but invalid.
    pub async fn from_env() -> Result<Self, AuthError> {
        let client = ProviderClient::from_env().await?;
        let ctx = Self::from_client(client);
        info!(backend = ctx.backend, configured = ctx.session.is_configured(), "auth context ready");
        Ok(ctx)
    }

    /// Name of the backend behind the session: `remote`, `local`,
    /// `unconfigured`, or `custom`.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
