use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::TempDir;

use databus_client::config::{ClientConfig, Config, ConfigLoader};
use databus_client::error::DatabusError;

#[test]
fn file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "auth_url": "https://auth.example.org/token",
            "vault_hosts": ["auth.example.org"],
            "endpoint": "https://catalog.example.org/sparql",
            "timeout_secs": 5
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.auth_url, "https://auth.example.org/token");
    assert_eq!(resolved.vault_hosts, vec!["auth.example.org".to_string()]);
    assert_eq!(
        resolved.endpoint.as_deref(),
        Some("https://catalog.example.org/sparql")
    );
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert_eq!(resolved.client_id, "vault-token-exchange");
    assert_eq!(resolved.vault_required_hosts, vec!["data.dbpedia.io".to_string()]);
}

#[test]
fn explicit_missing_file_is_read_error() {
    let err = ConfigLoader::resolve(Some("/no/such/databus/config.json")).unwrap_err();
    assert_matches!(err, DatabusError::ConfigRead(_));
}

#[test]
fn malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, DatabusError::ConfigParse(_));
}

#[test]
fn blank_optional_values_are_dropped() {
    let config = Config {
        endpoint: Some("  ".to_string()),
        api_key: Some(String::new()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config);
    assert_eq!(resolved, ClientConfig::default());
}
