mod common;

use assert_matches::assert_matches;
use serde_json::json;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::MockHost;
use databus_client::config::ClientConfig;
use databus_client::error::DatabusError;
use databus_client::vault::{TokenExchanger, TokenSource, VaultCredential, VaultHttpClient};

fn refresh_token_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("vault-token.dat");
    std::fs::write(&path, format!("{}\n", "r".repeat(120))).unwrap();
    path
}

fn setup(host: &MockHost, dir: &TempDir) -> (VaultHttpClient, VaultCredential) {
    let config = ClientConfig {
        vault_hosts: vec![host.authority()],
        ..ClientConfig::default()
    };
    let credential = VaultCredential {
        token_source: TokenSource {
            file: Some(refresh_token_file(dir)),
            env_var: None,
        },
        auth_url: host.url("/realms/databus/token"),
        client_id: "vault-token-exchange".to_string(),
    };
    (VaultHttpClient::new(&config).unwrap(), credential)
}

#[test]
fn two_step_exchange_yields_audience_scoped_token() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/realms/databus/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=vault-token-exchange"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "intermediate"})),
            )
            .expect(1),
    );
    host.mount(
        Mock::given(method("POST"))
            .and(path("/realms/databus/token"))
            .and(body_string_contains("token-exchange"))
            .and(body_string_contains("subject_token=intermediate"))
            .and(body_string_contains("audience=https%3A%2F%2Fdata.example.org"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "scoped-token"})),
            )
            .expect(1),
    );
    let dir = TempDir::new().unwrap();
    let (client, credential) = setup(&host, &dir);

    let target = Url::parse("https://data.example.org/acc/grp/art/1.0/f.ttl").unwrap();
    let token = client.exchange(&credential, &target).unwrap();
    assert_eq!(token.secret(), "scoped-token");
}

#[test]
fn rejected_refresh_is_auth_error_with_status() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/realms/databus/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .expect(1),
    );
    let dir = TempDir::new().unwrap();
    let (client, credential) = setup(&host, &dir);

    let target = Url::parse("https://data.example.org/file").unwrap();
    let err = client.exchange(&credential, &target).unwrap_err();
    assert_matches!(
        err,
        DatabusError::Auth { ref message, status: Some(400), ref detail }
            if message == "token exchange failed" && detail.as_deref() == Some("invalid_grant")
    );
    assert!(!err.to_string().contains(&"r".repeat(120)));
}

#[test]
fn response_without_access_token_is_auth_error() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/realms/databus/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "bearer"})))
            .expect(1),
    );
    let dir = TempDir::new().unwrap();
    let (client, credential) = setup(&host, &dir);

    let target = Url::parse("https://data.example.org/file").unwrap();
    let err = client.exchange(&credential, &target).unwrap_err();
    assert_matches!(
        err,
        DatabusError::Auth { ref message, .. } if message == "token exchange failed"
    );
}

#[test]
fn auth_host_outside_allow_list_gets_no_request() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0),
    );
    let dir = TempDir::new().unwrap();
    let config = ClientConfig {
        vault_hosts: vec!["auth.example.org".to_string()],
        ..ClientConfig::default()
    };
    let client = VaultHttpClient::new(&config).unwrap();
    let credential = VaultCredential {
        token_source: TokenSource {
            file: Some(refresh_token_file(&dir)),
            env_var: None,
        },
        auth_url: host.url("/realms/databus/token"),
        client_id: "vault-token-exchange".to_string(),
    };

    let target = Url::parse("https://data.example.org/file").unwrap();
    let err = client.exchange(&credential, &target).unwrap_err();
    assert_matches!(
        err,
        DatabusError::Auth { ref message, .. } if message == "vault host not permitted"
    );
}

#[test]
fn missing_token_file_fails_before_request() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0),
    );
    let dir = TempDir::new().unwrap();
    let (client, mut credential) = setup(&host, &dir);
    credential.token_source.file = Some(dir.path().join("absent.dat"));

    let target = Url::parse("https://data.example.org/file").unwrap();
    let err = client.exchange(&credential, &target).unwrap_err();
    assert_matches!(
        err,
        DatabusError::Auth { ref message, .. } if message == "token file not found"
    );
}
