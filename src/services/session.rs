//! Session service: the single source of truth for who is signed in.
//!
//! ARCHITECTURE
//! ============
//! Views subscribe to the session record and get the current snapshot
//! immediately, then one notification per committed transition. The service
//! is the only writer: every mutating operation ends by committing a record
//! through the observable, which notifies synchronously.
//!
//! TRADE-OFFS
//! ==========
//! Overlapping calls are not serialized. Each operation commits when its
//! provider calls settle, so the record reflects the most recently settled
//! operation, not the most recently started one.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::subscription::{Observable, Observer, Subscription};
use crate::provider::types::{
    AttributeMap, AuthError, IdentityProvider, ResetPasswordOutcome, SignInOutcome, SignUpOutcome,
};
use crate::state::{SessionRecord, SessionUser};

/// Observer of session records.
pub type SessionObserver = Observer<SessionRecord>;

#[derive(Clone)]
pub struct SessionService {
    provider: Arc<dyn IdentityProvider>,
    record: Observable<SessionRecord>,
}

impl SessionService {
    /// Create the service in the loading state. Call [`Self::initialize`] to
    /// recover an existing session.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider, record: Observable::new(SessionRecord::loading()) }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionRecord {
        self.record.get()
    }

    /// Register an observer. It is called right away with the current record.
    pub fn subscribe(&self, observer: SessionObserver) -> Subscription<SessionRecord> {
        self.record.subscribe(observer)
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.record.observer_count()
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    fn ensure_configured(&self, op: &str) -> Result<(), AuthError> {
        if self.provider.is_configured() {
            return Ok(());
        }
        warn!(op, "auth backend not configured");
        Err(AuthError::NotConfigured)
    }

    async fn load_user(&self) -> Result<SessionUser, AuthError> {
        let identity = self.provider.current_user().await?;
        let attributes = self.provider.fetch_user_attributes().await?;
        Ok(SessionUser::from_attributes(&identity, attributes))
    }

    /// Sign in and load the user. If loading fails the provider session is
    /// signed out again, so the provider never holds a session the record
    /// does not reflect.
    async fn sign_in_and_load(&self, email: &str, password: &str) -> Result<(SignInOutcome, Option<SessionUser>), AuthError> {
        let outcome = self.provider.sign_in(email, password).await?;
        if !outcome.is_signed_in {
            return Ok((outcome, None));
        }
        match self.load_user().await {
            Ok(user) => Ok((outcome, Some(user))),
            Err(e) => {
                if let Err(rollback) = self.provider.sign_out().await {
                    warn!(error = %rollback, "session: sign-in rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn update_and_fetch(&self, attributes: &AttributeMap) -> Result<AttributeMap, AuthError> {
        self.provider.update_user_attributes(attributes).await?;
        self.provider.fetch_user_attributes().await
    }

    /// Patch the user portion of the record. No commit when signed out.
    fn merge_attributes(&self, attributes: AttributeMap) -> Option<SessionUser> {
        self.record.try_update(|record| {
            let user = record.user.as_mut()?;
            user.apply_attributes(attributes);
            Some(user.clone())
        })
    }

    /// Recover an existing session. Never fails: a missing session, a missing
    /// backend, or any provider failure ends signed out. Commits exactly once.
    pub async fn initialize(&self) {
        let record = match self.load_user().await {
            Ok(user) => {
                info!(user_id = %user.id, "session: recovered");
                SessionRecord::signed_in(user)
            }
            Err(AuthError::NoSession | AuthError::NotConfigured) => {
                debug!("session: no existing session");
                SessionRecord::signed_out()
            }
            Err(e) => {
                warn!(error = %e, "session: recovery failed");
                SessionRecord::signed_out_with_error(e.to_string())
            }
        };
        self.record.replace(record);
    }

    /// Register a user. The user is not signed in until confirmed and signed in.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn sign_up(&self, email: &str, password: &str, name: Option<&str>) -> Result<SignUpOutcome, AuthError> {
        self.ensure_configured("sign_up")?;

        let mut attributes = AttributeMap::new();
        attributes.insert("email".into(), email.trim().to_owned());
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            attributes.insert("name".into(), name.to_owned());
        }

        self.provider
            .sign_up(email, password, &attributes)
            .await
            .inspect(|outcome| info!(email, complete = outcome.is_complete, "session: sign-up accepted"))
            .inspect_err(|e| warn!(email, error = %e, "session: sign-up failed"))
    }

    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), AuthError> {
        self.ensure_configured("confirm_sign_up")?;
        self.provider
            .confirm_sign_up(email, code)
            .await
            .inspect(|()| info!(email, "session: sign-up confirmed"))
            .inspect_err(|e| warn!(email, error = %e, "session: confirmation failed"))
    }

    /// Sign in and commit the signed-in record. On failure the record is left
    /// untouched. When the provider asks for a further step nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        self.ensure_configured("sign_in")?;

        match self.sign_in_and_load(email, password).await {
            Ok((outcome, Some(user))) => {
                info!(email, user_id = %user.id, "session: signed in");
                self.record.replace(SessionRecord::signed_in(user));
                Ok(outcome)
            }
            Ok((outcome, None)) => {
                info!(email, next_step = ?outcome.next_step, "session: sign-in needs another step");
                Ok(outcome)
            }
            Err(e) => {
                warn!(email, error = %e, "session: sign-in failed");
                Err(e)
            }
        }
    }

    /// Clear the provider session and commit the signed-out record. The
    /// record is cleared even when the provider call fails.
    ///
    /// # Errors
    ///
    /// Returns the provider's error after the record has been cleared.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.provider.sign_out().await;
        self.record.replace(SessionRecord::signed_out());
        match &result {
            Ok(()) => info!("session: signed out"),
            Err(e) => warn!(error = %e, "session: provider sign-out failed"),
        }
        result
    }

    /// Update attributes, re-fetch the canonical set, and merge it into the
    /// user portion of the record.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged; the record is not modified.
    pub async fn update_attributes(&self, attributes: &AttributeMap) -> Result<SessionUser, AuthError> {
        self.ensure_configured("update_attributes")?;

        let canonical = self
            .update_and_fetch(attributes)
            .await
            .inspect_err(|e| warn!(error = %e, "session: attribute update failed"))?;
        let user = self.merge_attributes(canonical).ok_or(AuthError::NoSession)?;
        info!(user_id = %user.id, keys = attributes.len(), "session: attributes updated");
        Ok(user)
    }

    /// Re-fetch attributes for the signed-in user. A vanished session is
    /// committed as signed out.
    ///
    /// # Errors
    ///
    /// Returns the provider's error; [`AuthError::NoSession`] after committing
    /// the signed-out record.
    pub async fn refresh_user(&self) -> Result<SessionUser, AuthError> {
        match self.provider.fetch_user_attributes().await {
            Ok(attributes) => {
                if let Some(user) = self.merge_attributes(attributes) {
                    debug!(user_id = %user.id, "session: attributes refreshed");
                    return Ok(user);
                }
                // Provider has a session we never committed; adopt it.
                let user = self.load_user().await?;
                self.record.replace(SessionRecord::signed_in(user.clone()));
                Ok(user)
            }
            Err(AuthError::NoSession) => {
                info!("session: expired during refresh");
                self.record.replace(SessionRecord::signed_out());
                Err(AuthError::NoSession)
            }
            Err(e) => {
                warn!(error = %e, "session: refresh failed");
                Err(e)
            }
        }
    }

    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn reset_password(&self, email: &str) -> Result<ResetPasswordOutcome, AuthError> {
        self.ensure_configured("reset_password")?;
        self.provider
            .reset_password(email)
            .await
            .inspect(|_| info!(email, "session: password reset requested"))
            .inspect_err(|e| warn!(email, error = %e, "session: password reset failed"))
    }

    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn confirm_reset_password(&self, email: &str, code: &str, new_password: &str) -> Result<(), AuthError> {
        self.ensure_configured("confirm_reset_password")?;
        self.provider
            .confirm_reset_password(email, code, new_password)
            .await
            .inspect(|()| info!(email, "session: password reset confirmed"))
            .inspect_err(|e| warn!(email, error = %e, "session: password reset confirmation failed"))
    }

    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        self.ensure_configured("update_password")?;
        self.provider
            .update_password(old_password, new_password)
            .await
            .inspect(|()| info!("session: password changed"))
            .inspect_err(|e| warn!(error = %e, "session: password change failed"))
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
