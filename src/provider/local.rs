//! Demo identity provider: users and the current session kept in a JSON
//! document, optionally persisted to disk.
//!
//! DESIGN
//! ======
//! Stand-in for the managed backend so the apps run without cloud
//! resources. Confirmation and reset codes are "delivered" to an in-memory
//! outbox and the log instead of email. Rejections reuse the remote
//! backend's codes so callers cannot tell the two apart.
//!
//! TRADE-OFFS
//! ==========
//! Every mutation rewrites the whole document (temp file + rename) while
//! holding the store lock. Fine for a handful of demo users, not for load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::LocalConfig;
use super::credentials::{
    generate_code, generate_salt, hash_secret, mask_destination, normalize_code, normalize_email,
    validate_password,
};
use super::types::{
    AttributeMap, AuthError, CodeDelivery, IdentityProvider, Identity, ResetPasswordOutcome, SignInOutcome,
    SignInStep, SignUpOutcome, SignUpStep, codes,
};

const MAX_FAILED_ATTEMPTS: u32 = 5;
const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;
const IMMUTABLE_ATTRIBUTES: &[&str] = &["sub", "email", "email_verified"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    ConfirmSignUp,
    ResetPassword,
}

/// A code handed to the demo outbox in place of an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredCode {
    pub email: String,
    pub code: String,
    pub purpose: CodePurpose,
}

// =============================================================================
// STORE DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Store {
    /// Users keyed by normalized email.
    users: BTreeMap<String, StoredUser>,
    session: Option<StoredSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    id: Uuid,
    salt: String,
    password_hash: String,
    confirmed: bool,
    attributes: AttributeMap,
    #[serde(default)]
    pending: Option<PendingCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingCode {
    purpose: CodePurpose,
    code_hash: String,
    expires_at: i64,
    attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    email: String,
    expires_at: i64,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn incorrect_credentials() -> AuthError {
    AuthError::rejected(codes::NOT_AUTHORIZED, "Incorrect username or password.")
}

fn user_not_found() -> AuthError {
    AuthError::rejected(codes::USER_NOT_FOUND, "Username/client id combination not found.")
}

fn invalid_email() -> AuthError {
    AuthError::rejected(codes::INVALID_PARAMETER, "Invalid email address format.")
}

// =============================================================================
// PROVIDER
// =============================================================================

pub struct LocalProvider {
    store: Mutex<Store>,
    path: Option<PathBuf>,
    code_ttl_secs: i64,
    outbox: std::sync::Mutex<Vec<DeliveredCode>>,
}

impl LocalProvider {
    /// Memory-only provider. Nothing survives the process.
    #[must_use]
    pub fn in_memory(code_ttl_secs: u64) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            path: None,
            code_ttl_secs: i64::try_from(code_ttl_secs).unwrap_or(i64::MAX),
            outbox: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Open the provider described by `config`, loading the store file if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file exists but cannot be read or parsed.
    pub async fn open(config: &LocalConfig) -> Result<Self, AuthError> {
        let mut provider = Self::in_memory(config.code_ttl_secs);
        let Some(path) = &config.store_path else {
            return Ok(provider);
        };

        let store = match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str::<Store>(&raw)
                .map_err(|e| AuthError::Storage(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::default(),
            Err(e) => return Err(AuthError::Storage(format!("{}: {e}", path.display()))),
        };
        debug!(path = %path.display(), users = store.users.len(), "local auth store loaded");

        provider.store = Mutex::new(store);
        provider.path = Some(path.clone());
        Ok(provider)
    }

    /// Drain every code delivered so far.
    pub fn take_outbox(&self) -> Vec<DeliveredCode> {
        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *outbox)
    }

    /// Most recent code delivered to `email` for `purpose`.
    #[must_use]
    pub fn last_code_for(&self, email: &str, purpose: CodePurpose) -> Option<String> {
        let email = normalize_email(email)?;
        let outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        outbox
            .iter()
            .rev()
            .find(|d| d.email == email && d.purpose == purpose)
            .map(|d| d.code.clone())
    }

    fn issue_code(&self, email: &str, user: &mut StoredUser, purpose: CodePurpose) -> CodeDelivery {
        let code = generate_code();
        user.pending = Some(PendingCode {
            purpose,
            code_hash: hash_secret(&user.salt, &code),
            expires_at: now_unix().saturating_add(self.code_ttl_secs),
            attempts: 0,
        });

        info!(%email, %code, ?purpose, "demo auth: code issued");
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeliveredCode { email: email.to_owned(), code, purpose });

        CodeDelivery { destination: mask_destination(email), medium: "EMAIL".into(), attribute: Some("email".into()) }
    }

    async fn persist(&self, store: &Store) -> Result<(), AuthError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(path, store).await
    }

    /// Run `f` against the locked store and persist afterwards, even when `f`
    /// fails (failed code attempts must be recorded).
    ///
    /// A rejection from `f` is returned as is; a failed write is only logged.
    /// When `f` succeeds but the write fails, the store is rolled back and
    /// the storage error returned, so memory never runs ahead of the file.
    async fn mutate<T, F>(&self, f: F) -> Result<T, AuthError>
    where
        T: Send,
        F: FnOnce(&mut Store) -> Result<T, AuthError> + Send,
    {
        let mut store = self.store.lock().await;
        let before = self.path.is_some().then(|| store.clone());
        let result = f(&mut *store);
        let Err(write_err) = self.persist(&store).await else {
            return result;
        };

        match result {
            Ok(_) => {
                warn!(error = %write_err, "demo auth: store write failed, change rolled back");
                if let Some(before) = before {
                    *store = before;
                }
                Err(write_err)
            }
            Err(e) => {
                warn!(error = %write_err, "demo auth: store write failed");
                Err(e)
            }
        }
    }
}

async fn write_atomic(path: &Path, store: &Store) -> Result<(), AuthError> {
    let bytes = serde_json::to_vec_pretty(store).map_err(|e| AuthError::Storage(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AuthError::Storage(format!("{}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| AuthError::Storage(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AuthError::Storage(format!("{}: {e}", path.display())))
}

fn verify_code(user: &mut StoredUser, purpose: CodePurpose, code: &str) -> Result<(), AuthError> {
    let Some(pending) = user.pending.as_mut().filter(|p| p.purpose == purpose) else {
        return Err(AuthError::rejected(codes::EXPIRED_CODE, "Invalid code provided, please request a code again."));
    };
    if pending.expires_at <= now_unix() {
        user.pending = None;
        return Err(AuthError::rejected(codes::EXPIRED_CODE, "Invalid code provided, please request a code again."));
    }

    let matches = normalize_code(code).is_some_and(|c| hash_secret(&user.salt, &c) == pending.code_hash);
    if !matches {
        pending.attempts += 1;
        if pending.attempts >= MAX_FAILED_ATTEMPTS {
            user.pending = None;
        }
        return Err(AuthError::rejected(
            codes::CODE_MISMATCH,
            "Invalid verification code provided, please try again.",
        ));
    }

    user.pending = None;
    Ok(())
}

/// Resolve the signed-in user, treating an expired session as absent.
fn session_email(store: &Store) -> Result<String, AuthError> {
    let session = store.session.as_ref().ok_or(AuthError::NoSession)?;
    if session.expires_at <= now_unix() || !store.users.contains_key(&session.email) {
        return Err(AuthError::NoSession);
    }
    Ok(session.email.clone())
}

fn set_password(user: &mut StoredUser, password: &str) {
    user.salt = generate_salt();
    user.password_hash = hash_secret(&user.salt, password);
}

#[async_trait::async_trait]
impl IdentityProvider for LocalProvider {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &AttributeMap,
    ) -> Result<SignUpOutcome, AuthError> {
        let email = normalize_email(username).ok_or_else(invalid_email)?;
        validate_password(password)?;

        self.mutate(|store| {
            if store.users.contains_key(&email) {
                return Err(AuthError::rejected(codes::USERNAME_EXISTS, "User already exists"));
            }

            let id = Uuid::new_v4();
            let mut attributes = attributes.clone();
            attributes.insert("sub".into(), id.to_string());
            attributes.insert("email".into(), email.clone());
            attributes.insert("email_verified".into(), "false".into());

            let mut user = StoredUser {
                id,
                salt: String::new(),
                password_hash: String::new(),
                confirmed: false,
                attributes,
                pending: None,
            };
            set_password(&mut user, password);
            let delivery = self.issue_code(&email, &mut user, CodePurpose::ConfirmSignUp);
            store.users.insert(email.clone(), user);

            info!(%email, user_id = %id, "demo auth: user registered");
            Ok(SignUpOutcome {
                user_id: Some(id.to_string()),
                is_complete: false,
                next_step: SignUpStep::ConfirmSignUp { delivery: Some(delivery) },
            })
        })
        .await
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), AuthError> {
        let email = normalize_email(username).ok_or_else(invalid_email)?;
        self.mutate(|store| {
            let user = store.users.get_mut(&email).ok_or_else(user_not_found)?;
            if user.confirmed {
                return Err(AuthError::rejected(
                    codes::NOT_AUTHORIZED,
                    "User cannot be confirmed. Current status is CONFIRMED",
                ));
            }
            verify_code(user, CodePurpose::ConfirmSignUp, code)?;
            user.confirmed = true;
            user.attributes.insert("email_verified".into(), "true".into());
            info!(%email, "demo auth: user confirmed");
            Ok(())
        })
        .await
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        let email = normalize_email(username).ok_or_else(incorrect_credentials)?;
        self.mutate(|store| {
            let user = store.users.get(&email).ok_or_else(incorrect_credentials)?;
            if hash_secret(&user.salt, password) != user.password_hash {
                return Err(incorrect_credentials());
            }
            if !user.confirmed {
                return Ok(SignInOutcome::pending(SignInStep::ConfirmSignUp));
            }

            store.session = Some(StoredSession {
                email: email.clone(),
                expires_at: now_unix().saturating_add(SESSION_TTL_SECS),
            });
            info!(%email, "demo auth: signed in");
            Ok(SignInOutcome::signed_in())
        })
        .await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.mutate(|store| {
            if let Some(session) = store.session.take() {
                info!(email = %session.email, "demo auth: signed out");
            }
            Ok(())
        })
        .await
    }

    async fn current_user(&self) -> Result<Identity, AuthError> {
        let store = self.store.lock().await;
        let email = session_email(&store)?;
        let user = store.users.get(&email).ok_or(AuthError::NoSession)?;
        Ok(Identity { user_id: user.id.to_string(), username: email })
    }

    async fn fetch_user_attributes(&self) -> Result<AttributeMap, AuthError> {
        let store = self.store.lock().await;
        let email = session_email(&store)?;
        let user = store.users.get(&email).ok_or(AuthError::NoSession)?;
        Ok(user.attributes.clone())
    }

    async fn reset_password(&self, username: &str) -> Result<ResetPasswordOutcome, AuthError> {
        let email = normalize_email(username).ok_or_else(invalid_email)?;
        self.mutate(|store| {
            let user = store.users.get_mut(&email).ok_or_else(user_not_found)?;
            if !user.confirmed {
                return Err(AuthError::rejected(
                    codes::INVALID_PARAMETER,
                    "Cannot reset password for the user as there is no registered/verified email",
                ));
            }
            let delivery = self.issue_code(&email, user, CodePurpose::ResetPassword);
            Ok(ResetPasswordOutcome { delivery: Some(delivery) })
        })
        .await
    }

    async fn confirm_reset_password(&self, username: &str, code: &str, new_password: &str) -> Result<(), AuthError> {
        let email = normalize_email(username).ok_or_else(invalid_email)?;
        validate_password(new_password)?;
        self.mutate(|store| {
            let user = store.users.get_mut(&email).ok_or_else(user_not_found)?;
            verify_code(user, CodePurpose::ResetPassword, code)?;
            set_password(user, new_password);
            info!(%email, "demo auth: password reset");
            Ok(())
        })
        .await
    }

    async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        self.mutate(|store| {
            let email = session_email(store)?;
            let user = store.users.get_mut(&email).ok_or(AuthError::NoSession)?;
            if hash_secret(&user.salt, old_password) != user.password_hash {
                return Err(incorrect_credentials());
            }
            validate_password(new_password)?;
            set_password(user, new_password);
            Ok(())
        })
        .await
    }

    async fn update_user_attributes(&self, attributes: &AttributeMap) -> Result<(), AuthError> {
        if let Some(key) = attributes
            .keys()
            .find(|k| k.trim().is_empty() || IMMUTABLE_ATTRIBUTES.contains(&k.as_str()))
        {
            return Err(AuthError::rejected(
                codes::INVALID_PARAMETER,
                format!("Cannot modify attribute '{key}'"),
            ));
        }

        self.mutate(|store| {
            let email = session_email(store)?;
            let user = store.users.get_mut(&email).ok_or(AuthError::NoSession)?;
            for (key, value) in attributes {
                if value.is_empty() {
                    user.attributes.remove(key);
                } else {
                    user.attributes.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
