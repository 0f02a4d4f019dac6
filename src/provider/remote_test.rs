use super::*;
use crate::provider::config::AuthTimeouts;
use crate::provider::types::ErrorCode;

fn unreachable_config() -> RemoteConfig {
    RemoteConfig {
        region: "us-east-1".into(),
        user_pool_id: None,
        client_id: "client123".into(),
        // Port 9 (discard) is closed on test hosts; connects fail fast.
        endpoint: "http://127.0.0.1:9".into(),
        token_file: None,
        timeouts: AuthTimeouts { request_secs: 2, connect_secs: 1 },
    }
}

// =============================================================================
// parse_error
// =============================================================================

#[test]
fn parse_error_passes_rejection_through() {
    let body = r#"{"__type":"UsernameExistsException","message":"User already exists"}"#;
    let err = parse_error(400, body);
    assert_eq!(err.provider_code(), Some("UsernameExistsException"));
    assert_eq!(err.to_string(), "User already exists");
}

#[test]
fn parse_error_strips_namespace_and_accepts_capital_message() {
    let body = r#"{"__type":"com.amazonaws.cognito#NotAuthorizedException","Message":"Incorrect username or password."}"#;
    let err = parse_error(400, body);
    assert_eq!(err.provider_code(), Some("NotAuthorizedException"));
    assert_eq!(err.to_string(), "Incorrect username or password.");
}

#[test]
fn parse_error_without_message_uses_code() {
    let err = parse_error(400, r#"{"__type":"LimitExceededException"}"#);
    assert_eq!(err.to_string(), "LimitExceededException");
}

#[test]
fn parse_error_non_json_is_status_error() {
    let err = parse_error(502, "<html>bad gateway</html>");
    assert!(matches!(err, AuthError::Response { status: 502, .. }));
}

// =============================================================================
// parse_body / attributes
// =============================================================================

#[test]
fn parse_body_empty_is_empty_object() {
    assert_eq!(parse_body("").unwrap(), json!({}));
    assert!(matches!(parse_body("{oops"), Err(AuthError::Parse(_))));
}

#[test]
fn attribute_list_shape() {
    let mut attrs = AttributeMap::new();
    attrs.insert("email".into(), "a@b.com".into());
    attrs.insert("name".into(), "A".into());
    let list = attribute_list(&attrs);
    assert_eq!(list, json!([{ "Name": "email", "Value": "a@b.com" }, { "Name": "name", "Value": "A" }]));
    assert_eq!(parse_attribute_list(&list), attrs);
}

#[test]
fn parse_attribute_list_skips_nameless_entries() {
    let list = json!([{ "Value": "orphan" }, { "Name": "sub", "Value": "abc" }, { "Name": "flag" }]);
    let attrs = parse_attribute_list(&list);
    assert_eq!(attrs.len(), 2);
    assert_eq!(attrs.get("sub").map(String::as_str), Some("abc"));
    assert_eq!(attrs.get("flag").map(String::as_str), Some(""));
}

// =============================================================================
// parse_sign_up / parse_auth_result / parse_get_user
// =============================================================================

#[test]
fn parse_sign_up_unconfirmed_with_delivery() {
    let value = json!({
        "UserConfirmed": false,
        "UserSub": "1234-abcd",
        "CodeDeliveryDetails": {
            "AttributeName": "email",
            "DeliveryMedium": "EMAIL",
            "Destination": "a***@b***.com"
        }
    });
    let outcome = parse_sign_up(&value);
    assert!(!outcome.is_complete);
    assert_eq!(outcome.user_id.as_deref(), Some("1234-abcd"));
    assert_eq!(
        outcome.next_step,
        SignUpStep::ConfirmSignUp {
            delivery: Some(CodeDelivery {
                destination: "a***@b***.com".into(),
                medium: "EMAIL".into(),
                attribute: Some("email".into()),
            })
        }
    );
}

#[test]
fn parse_sign_up_auto_confirmed() {
    let outcome = parse_sign_up(&json!({ "UserConfirmed": true, "UserSub": "x" }));
    assert!(outcome.is_complete);
    assert_eq!(outcome.next_step, SignUpStep::Done);
}

#[test]
fn parse_auth_result_extracts_tokens() {
    let value = json!({
        "AuthenticationResult": {
            "AccessToken": "access",
            "IdToken": "id",
            "RefreshToken": "refresh",
            "ExpiresIn": 3600,
            "TokenType": "Bearer"
        }
    });
    let tokens = parse_auth_result(&value, 1_000).unwrap().unwrap();
    assert_eq!(
        tokens,
        Tokens {
            access_token: "access".into(),
            id_token: Some("id".into()),
            refresh_token: Some("refresh".into()),
            expires_at: 4_600,
        }
    );
}

#[test]
fn parse_auth_result_challenge_is_none() {
    let value = json!({ "ChallengeName": "NEW_PASSWORD_REQUIRED", "Session": "s" });
    assert!(parse_auth_result(&value, 0).unwrap().is_none());
    assert_eq!(challenge_step(&value), Ok(SignInStep::NewPasswordRequired));
    assert_eq!(challenge_step(&json!({ "ChallengeName": "RESET_PASSWORD" })), Ok(SignInStep::ResetPassword));
}

#[test]
fn parse_auth_result_missing_access_token_is_parse_error() {
    let value = json!({ "AuthenticationResult": { "IdToken": "id" } });
    assert!(matches!(parse_auth_result(&value, 0), Err(AuthError::Parse(_))));
}

#[test]
fn parse_get_user_reads_username_and_attributes() {
    let value = json!({
        "Username": "a@b.com",
        "UserAttributes": [{ "Name": "sub", "Value": "u-1" }, { "Name": "name", "Value": "Ada" }]
    });
    let (username, attrs) = parse_get_user(&value).unwrap();
    assert_eq!(username, "a@b.com");
    assert_eq!(attrs.get("name").map(String::as_str), Some("Ada"));
    assert!(matches!(parse_get_user(&json!({})), Err(AuthError::Parse(_))));
}

// =============================================================================
// Tokens
// =============================================================================

#[test]
fn tokens_freshness_respects_skew() {
    let tokens = Tokens { access_token: "a".into(), id_token: None, refresh_token: None, expires_at: 1_000 };
    assert!(tokens.is_fresh(1_000 - EXPIRY_SKEW_SECS - 1));
    assert!(!tokens.is_fresh(1_000 - EXPIRY_SKEW_SECS));
    assert!(!tokens.is_fresh(2_000));
}

// =============================================================================
// RemoteProvider (no live backend)
// =============================================================================

#[tokio::test]
async fn without_tokens_current_user_is_no_session() {
    let provider = RemoteProvider::new(unreachable_config()).await.unwrap();
    assert_eq!(provider.current_user().await.unwrap_err(), AuthError::NoSession);
    assert_eq!(provider.fetch_user_attributes().await.unwrap_err(), AuthError::NoSession);
}

#[tokio::test]
async fn sign_out_without_tokens_is_ok() {
    let provider = RemoteProvider::new(unreachable_config()).await.unwrap();
    provider.sign_out().await.unwrap();
}

#[tokio::test]
async fn unreachable_backend_is_request_error() {
    let provider = RemoteProvider::new(unreachable_config()).await.unwrap();
    let err = provider.sign_in("a@b.com", "password1").await.unwrap_err();
    assert!(matches!(err, AuthError::Request(_)));
    assert!(err.retryable());
}

#[tokio::test]
async fn expired_tokens_without_refresh_are_dropped() {
    let path = std::env::temp_dir().join(format!("authstate-tokens-{}.json", uuid::Uuid::new_v4()));
    let stale = Tokens { access_token: "old".into(), id_token: None, refresh_token: None, expires_at: 0 };
    save_tokens(&path, &stale).await.unwrap();

    let config = RemoteConfig { token_file: Some(path.clone()), ..unreachable_config() };
    let provider = RemoteProvider::new(config).await.unwrap();
    assert_eq!(*provider.tokens.lock().await, Some(stale));

    assert_eq!(provider.current_user().await.unwrap_err(), AuthError::NoSession);
    assert!(provider.tokens.lock().await.is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn malformed_token_file_is_ignored() {
    let path = std::env::temp_dir().join(format!("authstate-tokens-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "garbage").unwrap();
    let config = RemoteConfig { token_file: Some(path.clone()), ..unreachable_config() };
    let provider = RemoteProvider::new(config).await.unwrap();
    assert!(provider.tokens.lock().await.is_none());
    let _ = std::fs::remove_file(&path);
}

// =============================================================================
// RemoteProvider (canned backend)
// =============================================================================

const AUTH_RESULT: &str = r#"{"AuthenticationResult":{"AccessToken":"access-1","IdToken":"id-1","RefreshToken":"refresh-1","ExpiresIn":3600}}"#;
const GET_USER: &str = r#"{"Username":"jane@example.com","UserAttributes":[{"Name":"sub","Value":"u-1"},{"Name":"email","Value":"jane@example.com"}]}"#;

/// Serve `(status, body)` replies in order, one request per connection.
/// Resolves to the `X-Amz-Target` header of each request received.
async fn canned_backend(replies: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut targets = Vec::new();
        for (status, body) in replies {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut raw = Vec::new();
            let mut buf = [0_u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let header = |name: &str| {
                head.lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
                    .map(|(_, v)| v.trim().to_owned())
            };
            let content_length: usize = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
            }
            targets.push(header("x-amz-target").unwrap_or_default());

            let reply = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/x-amz-json-1.1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
        targets
    });
    (endpoint, handle)
}

fn canned_config(endpoint: String) -> RemoteConfig {
    RemoteConfig { endpoint, ..unreachable_config() }
}

#[tokio::test]
async fn sign_in_then_current_user() {
    let (endpoint, server) = canned_backend(vec![(200, AUTH_RESULT), (200, GET_USER)]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    let outcome = provider.sign_in("jane@example.com", "Passw0rd1").await.unwrap();
    assert_eq!(outcome, SignInOutcome::signed_in());
    let identity = provider.current_user().await.unwrap();
    assert_eq!(identity, Identity { user_id: "u-1".into(), username: "jane@example.com".into() });

    let targets = server.await.unwrap();
    assert_eq!(
        targets,
        vec![
            "AWSCognitoIdentityProviderService.InitiateAuth".to_owned(),
            "AWSCognitoIdentityProviderService.GetUser".to_owned(),
        ]
    );
}

#[tokio::test]
async fn unconfirmed_user_sign_in_is_pending() {
    let body = r#"{"__type":"UserNotConfirmedException","message":"User is not confirmed."}"#;
    let (endpoint, _server) = canned_backend(vec![(400, body)]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    let outcome = provider.sign_in("jane@example.com", "Passw0rd1").await.unwrap();
    assert_eq!(outcome, SignInOutcome::pending(SignInStep::ConfirmSignUp));
    assert!(provider.tokens.lock().await.is_none());
}

#[tokio::test]
async fn wrong_password_is_passed_through() {
    let body = r#"{"__type":"NotAuthorizedException","message":"Incorrect username or password."}"#;
    let (endpoint, _server) = canned_backend(vec![(400, body)]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    let err = provider.sign_in("jane@example.com", "nope").await.unwrap_err();
    assert_eq!(err, AuthError::rejected(codes::NOT_AUTHORIZED, "Incorrect username or password."));
}

#[tokio::test]
async fn revoked_access_token_is_no_session() {
    let revoked = r#"{"__type":"NotAuthorizedException","message":"Access Token has been revoked"}"#;
    let (endpoint, _server) = canned_backend(vec![(200, AUTH_RESULT), (400, revoked)]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    provider.sign_in("jane@example.com", "Passw0rd1").await.unwrap();
    assert_eq!(provider.fetch_user_attributes().await.unwrap_err(), AuthError::NoSession);
    assert!(provider.tokens.lock().await.is_none());
}

#[tokio::test]
async fn stale_access_token_is_refreshed_and_refresh_token_kept() {
    let refreshed = r#"{"AuthenticationResult":{"AccessToken":"access-2","ExpiresIn":3600}}"#;
    let (endpoint, server) = canned_backend(vec![(200, refreshed), (200, GET_USER)]).await;

    let path = std::env::temp_dir().join(format!("authstate-tokens-{}.json", uuid::Uuid::new_v4()));
    let stale = Tokens {
        access_token: "access-1".into(),
        id_token: None,
        refresh_token: Some("refresh-1".into()),
        expires_at: 0,
    };
    save_tokens(&path, &stale).await.unwrap();

    let config = RemoteConfig { token_file: Some(path.clone()), ..canned_config(endpoint) };
    let provider = RemoteProvider::new(config).await.unwrap();
    let attrs = provider.fetch_user_attributes().await.unwrap();
    assert_eq!(attrs.get("sub").map(String::as_str), Some("u-1"));

    let tokens = provider.tokens.lock().await.clone().unwrap();
    assert_eq!(tokens.access_token, "access-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(load_tokens(&path).await, Some(tokens));

    assert_eq!(server.await.unwrap().len(), 2);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn sign_out_clears_tokens_even_when_backend_fails() {
    let (endpoint, _server) = canned_backend(vec![(200, AUTH_RESULT), (500, "")]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    provider.sign_in("jane@example.com", "Passw0rd1").await.unwrap();
    let err = provider.sign_out().await.unwrap_err();
    assert!(matches!(err, AuthError::Response { status: 500, .. }));
    assert!(provider.tokens.lock().await.is_none());
}

#[test]
fn mfa_challenges_are_rejected() {
    for name in ["SMS_MFA", "SOFTWARE_TOKEN_MFA", "SELECT_MFA_TYPE"] {
        let err = challenge_step(&json!({ "ChallengeName": name, "Session": "s" })).unwrap_err();
        assert_eq!(err.provider_code(), Some(codes::UNSUPPORTED_CHALLENGE));
        assert!(err.to_string().contains(name));
    }
}

#[test]
fn response_without_tokens_or_challenge_is_parse_error() {
    assert!(matches!(challenge_step(&json!({})), Err(AuthError::Parse(_))));
}

#[tokio::test]
async fn mfa_challenge_sign_in_fails_without_tokens() {
    let (endpoint, _server) = canned_backend(vec![(200, r#"{"ChallengeName":"SOFTWARE_TOKEN_MFA","Session":"s"}"#)]).await;
    let provider = RemoteProvider::new(canned_config(endpoint)).await.unwrap();

    let err = provider.sign_in("jane@example.com", "Passw0rd1").await.unwrap_err();
    assert_eq!(err.provider_code(), Some(codes::UNSUPPORTED_CHALLENGE));
    assert!(provider.tokens.lock().await.is_none());
}
