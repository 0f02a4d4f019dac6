use super::*;

/// # Safety
/// Tests must run with `--test-threads=1` to avoid env races.
unsafe fn clear_auth_env() {
    unsafe {
        std::env::remove_var("AUTH_PROVIDER");
        std::env::remove_var("AUTH_OUTPUTS_FILE");
        std::env::remove_var("AUTH_REGION");
        std::env::remove_var("AUTH_CLIENT_ID");
        std::env::remove_var("AUTH_USER_POOL_ID");
        std::env::remove_var("AUTH_ENDPOINT");
        std::env::remove_var("AUTH_TOKEN_FILE");
        std::env::remove_var("AUTH_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("AUTH_CONNECT_TIMEOUT_SECS");
        std::env::remove_var("AUTH_LOCAL_STORE");
        std::env::remove_var("AUTH_LOCAL_CODE_TTL_SECS");
    }
}

// =============================================================================
// from_env
// =============================================================================

#[test]
fn from_env_without_settings_is_not_configured() {
    unsafe { clear_auth_env() };
    assert_eq!(AuthConfig::from_env(), Err(AuthError::NotConfigured));
}

#[test]
fn from_env_missing_client_id_is_not_configured() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_REGION", "eu-west-1");
    }
    assert_eq!(AuthConfig::from_env(), Err(AuthError::NotConfigured));
    unsafe { clear_auth_env() };
}

#[test]
fn from_env_remote_defaults() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_REGION", "us-east-1");
        std::env::set_var("AUTH_CLIENT_ID", "client123");
    }

    let AuthConfig::Remote(cfg) = AuthConfig::from_env().unwrap() else {
        panic!("expected remote config");
    };
    assert_eq!(cfg.region, "us-east-1");
    assert_eq!(cfg.client_id, "client123");
    assert_eq!(cfg.endpoint, "https://cognito-idp.us-east-1.amazonaws.com");
    assert!(cfg.user_pool_id.is_none());
    assert!(cfg.token_file.is_none());
    assert_eq!(cfg.timeouts, AuthTimeouts::default());

    unsafe { clear_auth_env() };
}

#[test]
fn from_env_remote_overrides() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_REGION", "us-east-1");
        std::env::set_var("AUTH_CLIENT_ID", "client123");
        std::env::set_var("AUTH_USER_POOL_ID", "us-east-1_abc");
        std::env::set_var("AUTH_ENDPOINT", "http://127.0.0.1:9229/");
        std::env::set_var("AUTH_TOKEN_FILE", "/tmp/authstate-tokens.json");
        std::env::set_var("AUTH_REQUEST_TIMEOUT_SECS", "5");
        std::env::set_var("AUTH_CONNECT_TIMEOUT_SECS", "2");
    }

    let AuthConfig::Remote(cfg) = AuthConfig::from_env().unwrap() else {
        panic!("expected remote config");
    };
    assert_eq!(cfg.endpoint, "http://127.0.0.1:9229");
    assert_eq!(cfg.user_pool_id.as_deref(), Some("us-east-1_abc"));
    assert_eq!(cfg.token_file, Some(PathBuf::from("/tmp/authstate-tokens.json")));
    assert_eq!(cfg.timeouts, AuthTimeouts { request_secs: 5, connect_secs: 2 });

    unsafe { clear_auth_env() };
}

#[test]
fn from_env_local_defaults() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_PROVIDER", "local");
    }
    let cfg = AuthConfig::from_env().unwrap();
    assert_eq!(cfg, AuthConfig::Local(LocalConfig::default()));
    unsafe { clear_auth_env() };
}

#[test]
fn from_env_local_store_and_ttl() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_PROVIDER", "local");
        std::env::set_var("AUTH_LOCAL_STORE", "/tmp/authstate-demo.json");
        std::env::set_var("AUTH_LOCAL_CODE_TTL_SECS", "60");
    }
    let AuthConfig::Local(cfg) = AuthConfig::from_env().unwrap() else {
        panic!("expected local config");
    };
    assert_eq!(cfg.store_path, Some(PathBuf::from("/tmp/authstate-demo.json")));
    assert_eq!(cfg.code_ttl_secs, 60);
    unsafe { clear_auth_env() };
}

#[test]
fn from_env_rejects_unknown_provider() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_PROVIDER", "ldap");
    }
    let err = AuthConfig::from_env().unwrap_err();
    assert!(matches!(err, AuthError::ConfigParse(msg) if msg.contains("ldap")));
    unsafe { clear_auth_env() };
}

#[test]
fn from_env_invalid_timeout_falls_back_to_default() {
    unsafe {
        clear_auth_env();
        std::env::set_var("AUTH_REGION", "us-east-1");
        std::env::set_var("AUTH_CLIENT_ID", "client123");
        std::env::set_var("AUTH_REQUEST_TIMEOUT_SECS", "soon");
    }
    let AuthConfig::Remote(cfg) = AuthConfig::from_env().unwrap() else {
        panic!("expected remote config");
    };
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_AUTH_REQUEST_TIMEOUT_SECS);
    unsafe { clear_auth_env() };
}

// =============================================================================
// from_outputs_json
// =============================================================================

#[test]
fn outputs_json_parses_auth_section() {
    let raw = r#"{
        "version": "1",
        "auth": {
            "aws_region": "eu-central-1",
            "user_pool_id": "eu-central-1_XYZ",
            "user_pool_client_id": "abc123",
            "identity_pool_id": "ignored"
        },
        "data": { "url": "https://example.invalid/graphql" }
    }"#;
    let cfg = RemoteConfig::from_outputs_json(raw).unwrap();
    assert_eq!(cfg.region, "eu-central-1");
    assert_eq!(cfg.client_id, "abc123");
    assert_eq!(cfg.user_pool_id.as_deref(), Some("eu-central-1_XYZ"));
    assert_eq!(cfg.endpoint, "https://cognito-idp.eu-central-1.amazonaws.com");
}

#[test]
fn outputs_json_without_auth_is_not_configured() {
    let raw = r#"{ "version": "1", "data": {} }"#;
    assert_eq!(RemoteConfig::from_outputs_json(raw), Err(AuthError::NotConfigured));
}

#[test]
fn outputs_json_blank_client_is_not_configured() {
    let raw = r#"{ "auth": { "aws_region": "us-east-1", "user_pool_client_id": " " } }"#;
    assert_eq!(RemoteConfig::from_outputs_json(raw), Err(AuthError::NotConfigured));
}

#[test]
fn outputs_json_malformed_is_parse_error() {
    assert!(matches!(RemoteConfig::from_outputs_json("{ not json"), Err(AuthError::ConfigParse(_))));
}
