//! Managed user-pool client.
//!
//! Thin HTTP wrapper over the user-pool JSON protocol (`POST /` with an
//! `X-Amz-Target` action header). Pure request/response shaping lives in
//! free functions for testability.
//!
//! DESIGN
//! ======
//! Tokens are held in memory and mirrored to an optional token file so a
//! fresh process can recover the session. Expired access tokens are renewed
//! with the refresh token before any authenticated call.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::RemoteConfig;
use super::types::{
    AttributeMap, AuthError, CodeDelivery, IdentityProvider, Identity, ResetPasswordOutcome, SignInOutcome,
    SignInStep, SignUpOutcome, SignUpStep, codes,
};

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
/// Refresh this many seconds before the access token actually expires.
const EXPIRY_SKEW_SECS: i64 = 60;

// =============================================================================
// TOKENS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix timestamp after which the access token is no longer valid.
    pub expires_at: i64,
}

impl Tokens {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - EXPIRY_SKEW_SECS > now
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct RemoteProvider {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    token_file: Option<PathBuf>,
    tokens: Mutex<Option<Tokens>>,
}

impl RemoteProvider {
    /// Build the client and load any persisted tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build. An unreadable
    /// token file is logged and treated as signed out.
    pub async fn new(config: RemoteConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::HttpClientBuild(e.to_string()))?;

        let tokens = match &config.token_file {
            Some(path) => load_tokens(path).await,
            None => None,
        };

        Ok(Self {
            http,
            endpoint: config.endpoint,
            client_id: config.client_id,
            token_file: config.token_file,
            tokens: Mutex::new(tokens),
        })
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value, AuthError> {
        debug!(action, "user pool request");
        let response = self
            .http
            .post(format!("{}/", self.endpoint))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if status != 200 {
            return Err(parse_error(status, &text));
        }
        parse_body(&text)
    }

    async fn store_tokens(&self, tokens: Option<Tokens>) {
        if let Some(path) = &self.token_file {
            let result = match &tokens {
                Some(t) => save_tokens(path, t).await,
                None => match tokio::fs::remove_file(path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AuthError::Storage(e.to_string())),
                    _ => Ok(()),
                },
            };
            if let Err(e) = result {
                warn!(error = %e, path = %path.display(), "token file update failed");
            }
        }
        *self.tokens.lock().await = tokens;
    }

    /// Current access token, refreshed when stale.
    async fn access_token(&self) -> Result<String, AuthError> {
        let current = self.tokens.lock().await.clone().ok_or(AuthError::NoSession)?;
        if current.is_fresh(now_unix()) {
            return Ok(current.access_token);
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            self.store_tokens(None).await;
            return Err(AuthError::NoSession);
        };

        let body = json!({
            "AuthFlow": "REFRESH_TOKEN_AUTH",
            "ClientId": self.client_id,
            "AuthParameters": { "REFRESH_TOKEN": refresh_token },
        });
        match self.call("InitiateAuth", body).await {
            Ok(value) => {
                let mut tokens = parse_auth_result(&value, now_unix())?.ok_or(AuthError::NoSession)?;
                // Refresh responses omit the refresh token; keep the one we have.
                tokens.refresh_token = tokens.refresh_token.or(Some(refresh_token));
                let access = tokens.access_token.clone();
                self.store_tokens(Some(tokens)).await;
                info!("user pool tokens refreshed");
                Ok(access)
            }
            Err(e @ AuthError::Rejected { .. }) => {
                debug!(error = %e, "refresh token rejected");
                self.store_tokens(None).await;
                Err(AuthError::NoSession)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self) -> Result<(String, AttributeMap), AuthError> {
        let access = self.access_token().await?;
        let value = match self.call("GetUser", json!({ "AccessToken": access })).await {
            Ok(value) => value,
            // Revoked or globally signed out elsewhere.
            Err(e) if e.provider_code() == Some(codes::NOT_AUTHORIZED) => {
                debug!(error = %e, "access token rejected");
                self.store_tokens(None).await;
                return Err(AuthError::NoSession);
            }
            Err(e) => return Err(e),
        };
        parse_get_user(&value)
    }
}

async fn load_tokens(path: &std::path::Path) -> Option<Tokens> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "token file unreadable");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "token file malformed");
            None
        }
    }
}

async fn save_tokens(path: &std::path::Path, tokens: &Tokens) -> Result<(), AuthError> {
    let bytes = serde_json::to_vec(tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| AuthError::Storage(e.to_string()))
}

// =============================================================================
// WIRE SHAPING
// =============================================================================

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: String,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Map a non-200 response to an error. Bodies carrying `__type` become
/// verbatim rejections; anything else is a bare status error.
fn parse_error(status: u16, body: &str) -> AuthError {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return AuthError::Response { status, body: body.to_owned() };
    };
    // `__type` may be namespaced: `com.amazonaws...#NotAuthorizedException`.
    let code = parsed.kind.rsplit('#').next().unwrap_or(&parsed.kind);
    let message = parsed.message.unwrap_or_else(|| code.to_owned());
    AuthError::rejected(code, message)
}

fn parse_body(text: &str) -> Result<Value, AuthError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(text).map_err(|e| AuthError::Parse(e.to_string()))
}

fn attribute_list(attributes: &AttributeMap) -> Value {
    Value::Array(
        attributes
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect(),
    )
}

fn parse_attribute_list(value: &Value) -> AttributeMap {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("Name")?.as_str()?;
                    let value = item.get("Value").and_then(Value::as_str).unwrap_or_default();
                    Some((name.to_owned(), value.to_owned()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_delivery(value: &Value) -> Option<CodeDelivery> {
    let details = value.get("CodeDeliveryDetails")?;
    Some(CodeDelivery {
        destination: details.get("Destination")?.as_str()?.to_owned(),
        medium: details
            .get("DeliveryMedium")
            .and_then(Value::as_str)
            .unwrap_or("EMAIL")
            .to_owned(),
        attribute: details
            .get("AttributeName")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

fn parse_sign_up(value: &Value) -> SignUpOutcome {
    let confirmed = value
        .get("UserConfirmed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let user_id = value
        .get("UserSub")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let next_step = if confirmed {
        SignUpStep::Done
    } else {
        SignUpStep::ConfirmSignUp { delivery: parse_delivery(value) }
    };
    SignUpOutcome { user_id, is_complete: confirmed, next_step }
}

/// Extract tokens from an `InitiateAuth` response. `Ok(None)` when the
/// response is a challenge instead of a result.
fn parse_auth_result(value: &Value, now: i64) -> Result<Option<Tokens>, AuthError> {
    let Some(result) = value.get("AuthenticationResult") else {
        return Ok(None);
    };
    let access_token = result
        .get("AccessToken")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::Parse("AuthenticationResult missing AccessToken".into()))?;
    let expires_in = result
        .get("ExpiresIn")
        .and_then(Value::as_i64)
        .unwrap_or(3600);
    Ok(Some(Tokens {
        access_token: access_token.to_owned(),
        id_token: result
            .get("IdToken")
            .and_then(Value::as_str)
            .map(str::to_owned),
        refresh_token: result
            .get("RefreshToken")
            .and_then(Value::as_str)
            .map(str::to_owned),
        expires_at: now.saturating_add(expires_in),
    }))
}

/// Map an `InitiateAuth` challenge to the next sign-in step. Challenges
/// with no matching step (MFA, custom auth) are rejected.
fn challenge_step(value: &Value) -> Result<SignInStep, AuthError> {
    match value.get("ChallengeName").and_then(Value::as_str) {
        Some("NEW_PASSWORD_REQUIRED") => Ok(SignInStep::NewPasswordRequired),
        Some("RESET_PASSWORD") => Ok(SignInStep::ResetPassword),
        Some(other) => Err(AuthError::rejected(
            codes::UNSUPPORTED_CHALLENGE,
            format!("Sign-in challenge {other} is not supported."),
        )),
        None => Err(AuthError::Parse("InitiateAuth returned neither tokens nor a challenge".into())),
    }
}

fn parse_get_user(value: &Value) -> Result<(String, AttributeMap), AuthError> {
    let username = value
        .get("Username")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::Parse("GetUser missing Username".into()))?;
    let attributes = parse_attribute_list(value.get("UserAttributes").unwrap_or(&Value::Null));
    Ok((username.to_owned(), attributes))
}

// =============================================================================
// IDENTITY PROVIDER
// =============================================================================

#[async_trait::async_trait]
impl IdentityProvider for RemoteProvider {
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &AttributeMap,
    ) -> Result<SignUpOutcome, AuthError> {
        let body = json!({
            "ClientId": self.client_id,
            "Username": username,
            "Password": password,
            "UserAttributes": attribute_list(attributes),
        });
        let value = self.call("SignUp", body).await?;
        Ok(parse_sign_up(&value))
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), AuthError> {
        let body = json!({ "ClientId": self.client_id, "Username": username, "ConfirmationCode": code });
        self.call("ConfirmSignUp", body).await?;
        Ok(())
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        let body = json!({
            "AuthFlow": "USER_PASSWORD_AUTH",
            "ClientId": self.client_id,
            "AuthParameters": { "USERNAME": username, "PASSWORD": password },
        });
        let value = match self.call("InitiateAuth", body).await {
            Ok(value) => value,
            Err(e) => {
                return match e.provider_code() {
                    Some(codes::USER_NOT_CONFIRMED) => Ok(SignInOutcome::pending(SignInStep::ConfirmSignUp)),
                    Some(codes::PASSWORD_RESET_REQUIRED) => Ok(SignInOutcome::pending(SignInStep::ResetPassword)),
                    _ => Err(e),
                };
            }
        };

        match parse_auth_result(&value, now_unix())? {
            Some(tokens) => {
                self.store_tokens(Some(tokens)).await;
                Ok(SignInOutcome::signed_in())
            }
            None => Ok(SignInOutcome::pending(challenge_step(&value)?)),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let tokens = self.tokens.lock().await.clone();
        self.store_tokens(None).await;

        let Some(tokens) = tokens else {
            return Ok(());
        };
        if let Err(e) = self
            .call("GlobalSignOut", json!({ "AccessToken": tokens.access_token }))
            .await
        {
            warn!(error = %e, "global sign-out failed; local tokens cleared");
            return Err(e);
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<Identity, AuthError> {
        let (username, attributes) = self.get_user().await?;
        let user_id = attributes
            .get("sub")
            .cloned()
            .unwrap_or_else(|| username.clone());
        Ok(Identity { user_id, username })
    }

    async fn fetch_user_attributes(&self) -> Result<AttributeMap, AuthError> {
        let (_, attributes) = self.get_user().await?;
        Ok(attributes)
    }

    async fn reset_password(&self, username: &str) -> Result<ResetPasswordOutcome, AuthError> {
        let body = json!({ "ClientId": self.client_id, "Username": username });
        let value = self.call("ForgotPassword", body).await?;
        Ok(ResetPasswordOutcome { delivery: parse_delivery(&value) })
    }

    async fn confirm_reset_password(&self, username: &str, code: &str, new_password: &str) -> Result<(), AuthError> {
        let body = json!({
            "ClientId": self.client_id,
            "Username": username,
            "ConfirmationCode": code,
            "Password": new_password,
        });
        self.call("ConfirmForgotPassword", body).await?;
        Ok(())
    }

    async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        let access = self.access_token().await?;
        let body = json!({
            "AccessToken": access,
            "PreviousPassword": old_password,
            "ProposedPassword": new_password,
        });
        self.call("ChangePassword", body).await?;
        Ok(())
    }

    async fn update_user_attributes(&self, attributes: &AttributeMap) -> Result<(), AuthError> {
        let access = self.access_token().await?;
        let body = json!({ "AccessToken": access, "UserAttributes": attribute_list(attributes) });
        self.call("UpdateUserAttributes", body).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
