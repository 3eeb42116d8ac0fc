use std::fmt;
use std::fs;
use std::path::PathBuf;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::DatabusError;
use crate::http::{self, Redirects};

const REFRESH_GRANT: &str = "refresh_token";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SHORT_TOKEN_LEN: usize = 80;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSource {
    pub file: Option<PathBuf>,
    pub env_var: Option<String>,
}

impl TokenSource {
    pub fn is_configured(&self) -> bool {
        self.file.is_some() || self.env_var.is_some()
    }

    pub fn resolve(&self) -> Result<String, DatabusError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, lookup: F) -> Result<String, DatabusError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(DatabusError::Auth {
                    message: "token file not found".to_string(),
                    status: None,
                    detail: Some(path.display().to_string()),
                });
            }
            let content = fs::read_to_string(path).map_err(|err| {
                DatabusError::Filesystem(format!("read {}: {err}", path.display()))
            })?;
            let token = content.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        } else if let Some(name) = &self.env_var {
            if let Some(token) = lookup(name).map(|value| value.trim().to_string()) {
                if !token.is_empty() {
                    return Ok(token);
                }
            }
        }
        Err(DatabusError::auth("no refresh token available"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultCredential {
    pub token_source: TokenSource,
    pub auth_url: String,
    pub client_id: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(REDACTED)")
    }
}

pub fn audience(target: &Url) -> String {
    target.origin().ascii_serialization()
}

pub trait TokenExchanger: Send + Sync {
    fn exchange(
        &self,
        credential: &VaultCredential,
        target: &Url,
    ) -> Result<AccessToken, DatabusError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Clone)]
pub struct VaultHttpClient {
    client: Client,
    config: ClientConfig,
}

impl VaultHttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, DatabusError> {
        // Token endpoints must answer directly.
        let client = http::build_client(config.timeout, Redirects::Manual)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn check_auth_host(&self, auth_url: &str) -> Result<Url, DatabusError> {
        let parsed = Url::parse(auth_url).map_err(|err| DatabusError::Auth {
            message: "invalid vault auth URL".to_string(),
            status: None,
            detail: Some(err.to_string()),
        })?;
        let host = parsed.host_str().unwrap_or_default();
        if !self.config.is_vault_host(host, parsed.port()) {
            return Err(DatabusError::Auth {
                message: "vault host not permitted".to_string(),
                status: None,
                detail: Some(host.to_string()),
            });
        }
        Ok(parsed)
    }

    fn request_token(&self, auth_url: &Url, form: &[(&str, &str)]) -> Result<String, DatabusError> {
        let request = self.client.post(auth_url.clone()).form(form);
        let response = http::send_logged(&self.client, request)
            .map_err(|err| DatabusError::transport(auth_url.as_str(), &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DatabusError::Auth {
                message: "token exchange failed".to_string(),
                status: Some(status.as_u16()),
                detail: Some(http::error_body(response)),
            });
        }
        let body: TokenResponse = response.json().map_err(|err| DatabusError::Auth {
            message: "token exchange failed".to_string(),
            status: Some(status.as_u16()),
            detail: Some(format!("undecodable token response: {err}")),
        })?;
        body.access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| DatabusError::Auth {
                message: "token exchange failed".to_string(),
                status: Some(status.as_u16()),
                detail: Some("response lacked access_token".to_string()),
            })
    }
}

impl TokenExchanger for VaultHttpClient {
    fn exchange(
        &self,
        credential: &VaultCredential,
        target: &Url,
    ) -> Result<AccessToken, DatabusError> {
        let audience = audience(target);
        let auth_url = self.check_auth_host(&credential.auth_url)?;

        let refresh_token = credential.token_source.resolve()?;
        if refresh_token.len() < SHORT_TOKEN_LEN {
            warn!(
                len = refresh_token.len(),
                "refresh token is shorter than {SHORT_TOKEN_LEN} characters"
            );
        }

        debug!(auth_url = %auth_url, "refreshing access token");
        let access_token = self.request_token(
            &auth_url,
            &[
                ("client_id", credential.client_id.as_str()),
                ("grant_type", REFRESH_GRANT),
                ("refresh_token", refresh_token.as_str()),
            ],
        )?;

        debug!(auth_url = %auth_url, audience = %audience, "exchanging for vault token");
        let vault_token = self.request_token(
            &auth_url,
            &[
                ("client_id", credential.client_id.as_str()),
                ("grant_type", TOKEN_EXCHANGE_GRANT),
                ("subject_token", access_token.as_str()),
                ("audience", audience.as_str()),
            ],
        )?;
        if vault_token.len() < SHORT_TOKEN_LEN {
            warn!(
                len = vault_token.len(),
                audience = %audience,
                "vault returned a suspiciously short access token"
            );
        }
        info!(audience = %audience, "obtained vault access token");
        Ok(AccessToken::new(vault_token))
    }
}
