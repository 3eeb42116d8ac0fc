use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DatabusError {
    #[error("invalid databus identifier {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("{0}")]
    Resolution(String),

    #[error("invalid catalog response from {url}: {message}")]
    Metadata { url: String, message: String },

    #[error("{message}{}", auth_suffix(.status, .detail))]
    Auth {
        message: String,
        status: Option<u16>,
        detail: Option<String>,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("too many redirects starting at {url} (limit {max})")]
    RedirectLoop { url: String, max: usize },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl DatabusError {
    pub fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
            status: None,
            detail: None,
        }
    }

    pub fn metadata(url: &str, message: impl Into<String>) -> Self {
        Self::Metadata {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn transport(url: &str, err: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn auth_suffix(status: &Option<u16>, detail: &Option<String>) -> String {
    match (status, detail) {
        (Some(status), Some(detail)) => format!(" (status {status}: {detail})"),
        (Some(status), None) => format!(" (status {status})"),
        (None, Some(detail)) => format!(" ({detail})"),
        (None, None) => String::new(),
    }
}
