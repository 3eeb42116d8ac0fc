use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::DatabusError;

pub const DEFAULT_AUTH_URL: &str =
    "https://auth.dbpedia.org/realms/dbpedia/protocol/openid-connect/token";
pub const DEFAULT_CLIENT_ID: &str = "vault-token-exchange";
pub const DEFAULT_TOKEN_ENV_VAR: &str = "REFRESH_TOKEN";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

const CONFIG_DIR_NAME: &str = "databus-client";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub vault_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub vault_required_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token_env_var: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_redirects: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub auth_url: String,
    pub client_id: String,
    pub vault_hosts: Vec<String>,
    pub vault_required_hosts: Vec<String>,
    pub endpoint: Option<String>,
    pub token_env_var: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            vault_hosts: vec!["auth.dbpedia.org".to_string()],
            vault_required_hosts: vec!["data.dbpedia.io".to_string()],
            endpoint: None,
            token_env_var: DEFAULT_TOKEN_ENV_VAR.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl ClientConfig {
    pub fn is_vault_host(&self, host: &str, port: Option<u16>) -> bool {
        host_listed(&self.vault_hosts, host, port)
    }

    pub fn requires_vault(&self, host: &str, port: Option<u16>) -> bool {
        host_listed(&self.vault_required_hosts, host, port)
    }
}

fn host_listed(list: &[String], host: &str, port: Option<u16>) -> bool {
    let with_port = port.map(|port| format!("{host}:{port}"));
    list.iter().any(|entry| {
        let entry = entry.trim();
        entry.eq_ignore_ascii_case(host)
            || with_port
                .as_deref()
                .is_some_and(|candidate| entry.eq_ignore_ascii_case(candidate))
    })
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, DatabusError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(ClientConfig::default()),
            },
        };
        let config = Self::read(&config_path)?;
        Ok(Self::resolve_config(config))
    }

    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| {
            dirs.config_dir()
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME)
        })
    }

    fn read(path: &Path) -> Result<Config, DatabusError> {
        let content =
            fs::read_to_string(path).map_err(|_| DatabusError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| DatabusError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            auth_url: config.auth_url.unwrap_or(defaults.auth_url),
            client_id: config.client_id.unwrap_or(defaults.client_id),
            vault_hosts: config.vault_hosts.unwrap_or(defaults.vault_hosts),
            vault_required_hosts: config
                .vault_required_hosts
                .unwrap_or(defaults.vault_required_hosts),
            endpoint: config.endpoint.filter(|value| !value.trim().is_empty()),
            token_env_var: config.token_env_var.unwrap_or(defaults.token_env_var),
            api_key: config.api_key.filter(|value| !value.trim().is_empty()),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_redirects: config.max_redirects.unwrap_or(defaults.max_redirects),
        }
    }
}
