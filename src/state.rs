//! Session state: the in-memory record of who is signed in.
//!
//! DESIGN
//! ======
//! Exactly one `SessionRecord` exists per running app, owned by the session
//! service. It is replaced wholesale on every transition except attribute
//! merges, which patch only the user portion.

use serde::Serialize;

use crate::provider::credentials::local_part;
use crate::provider::types::{AttributeMap, Identity};

// =============================================================================
// SESSION USER
// =============================================================================

/// The signed-in user as seen by views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    /// Opaque provider identity reference.
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    /// Raw attributes as last fetched from the provider.
    pub attributes: AttributeMap,
}

impl SessionUser {
    #[must_use]
    pub fn from_attributes(identity: &Identity, attributes: AttributeMap) -> Self {
        let mut user = Self {
            id: identity.user_id.clone(),
            email: identity.username.clone(),
            name: None,
            attributes: AttributeMap::new(),
        };
        user.apply_attributes(attributes);
        user
    }

    /// Replace the attribute map and re-derive `email` and `name`. The id is kept.
    pub fn apply_attributes(&mut self, attributes: AttributeMap) {
        if let Some(email) = attributes.get("email").filter(|v| !v.is_empty()) {
            self.email.clone_from(email);
        }
        self.name = attributes
            .get("name")
            .filter(|v| !v.trim().is_empty())
            .cloned();
        self.attributes = attributes;
    }

    /// Name to greet the user with: the display name, or the email's local part.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| local_part(&self.email))
    }
}

// =============================================================================
// SESSION RECORD
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    SignedOut,
    SignedIn,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::SignedOut => "signed-out",
            Self::SignedIn => "signed-in",
        })
    }
}

/// Current authentication snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub user: Option<SessionUser>,
    pub authenticated: bool,
    pub loading: bool,
    /// Why session recovery failed, when it failed for a reason other than
    /// "nobody is signed in".
    pub error: Option<String>,
}

impl SessionRecord {
    /// State at construction, before session recovery has run.
    #[must_use]
    pub fn loading() -> Self {
        Self { user: None, authenticated: false, loading: true, error: None }
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self { user: None, authenticated: false, loading: false, error: None }
    }

    #[must_use]
    pub fn signed_out_with_error(message: impl Into<String>) -> Self {
        Self { error: Some(message.into()), ..Self::signed_out() }
    }

    #[must_use]
    pub fn signed_in(user: SessionUser) -> Self {
        Self { user: Some(user), authenticated: true, loading: false, error: None }
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if self.loading {
            SessionStatus::Loading
        } else if self.authenticated {
            SessionStatus::SignedIn
        } else {
            SessionStatus::SignedOut
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
