//! Credential helpers: email/code normalization, code and salt
//! generation, salted hashing, password policy.

use std::fmt::Write;

use rand::Rng;
use sha2::{Digest, Sha256};

use super::types::{AuthError, codes};

pub const CODE_LEN: usize = 6;
pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    if normalized.is_empty() || !normalized.contains('@') {
        return None;
    }
    let parts = normalized.split('@').collect::<Vec<_>>();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return None;
    }
    Some(normalized)
}

/// Normalize a six-digit confirmation code. Surrounding whitespace is ignored.
#[must_use]
pub fn normalize_code(code: &str) -> Option<String> {
    let normalized = code.trim();
    if normalized.len() != CODE_LEN || !normalized.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(normalized.to_owned())
}

#[must_use]
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

#[must_use]
pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// SHA-256 of `salt:secret`, hex encoded.
#[must_use]
pub fn hash_secret(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// Enforce the minimum password policy: length, one letter, one digit.
///
/// # Errors
///
/// Returns an `InvalidPasswordException` rejection describing the first unmet rule.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::rejected(
            codes::INVALID_PASSWORD,
            format!("Password did not conform with policy: Password not long enough (min {MIN_PASSWORD_LEN})"),
        ));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(AuthError::rejected(
            codes::INVALID_PASSWORD,
            "Password did not conform with policy: Password must have letters",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::rejected(
            codes::INVALID_PASSWORD,
            "Password did not conform with policy: Password must have numeric characters",
        ));
    }
    Ok(())
}

/// Mask an email for code-delivery details: `user@example.com` → `u***@e***.com`.
#[must_use]
pub fn mask_destination(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_owned();
    };
    let first_local = local.chars().next().unwrap_or('*');
    let (host, tld) = domain.rsplit_once('.').unwrap_or((domain, ""));
    let first_host = host.chars().next().unwrap_or('*');
    if tld.is_empty() {
        format!("{first_local}***@{first_host}***")
    } else {
        format!("{first_local}***@{first_host}***.{tld}")
    }
}

/// Local part of an email, or `"user"` when empty.
#[must_use]
pub fn local_part(email: &str) -> &str {
    email
        .split('@')
        .next()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("user")
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
