use std::fs;
use std::io::{Read, Write};
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::domain::DownloadTask;
use crate::error::DatabusError;
use crate::http::{self, Redirects};
use crate::vault::{AccessToken, TokenExchanger, audience};

const CHUNK_SIZE: usize = 64 * 1024;

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_]+)\s*=\s*(?:"([^"]*)"|([^,\s]+))"#).unwrap());

pub trait FileFetcher {
    fn fetch(&self, task: &DownloadTask) -> Result<DownloadOutcome, DatabusError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub final_url: String,
    pub destination: Utf8PathBuf,
    pub bytes_written: u64,
    pub expected_bytes: Option<u64>,
    pub redirects: usize,
    pub authenticated: bool,
}

impl DownloadOutcome {
    pub fn length_matches(&self) -> bool {
        self.expected_bytes
            .is_none_or(|expected| expected == self.bytes_written)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: Option<String>,
    pub audience: Option<String>,
}

pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let trimmed = header.trim_start();
    let (scheme, params) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let mut challenge = BearerChallenge::default();
    for capture in CHALLENGE_PARAM.captures_iter(params) {
        let value = capture
            .get(2)
            .or_else(|| capture.get(3))
            .map(|value| value.as_str().to_string());
        match capture[1].to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = value,
            "audience" | "aud" | "scope" if challenge.audience.is_none() => {
                challenge.audience = value
            }
            _ => {}
        }
    }
    Some(challenge)
}

enum State {
    Init,
    Probe { url: Url },
    FollowRedirect { from: Url, location: String },
    Challenge { url: Url, challenge: BearerChallenge },
    AuthExchange { url: Url },
    Retry { url: Url },
    ApiKeyRetry { url: Url },
    Stream { url: Url, response: Response },
}

enum Transition {
    Next(State),
    Done(DownloadOutcome),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Init => "init",
            State::Probe { .. } => "probe",
            State::FollowRedirect { .. } => "follow_redirect",
            State::Challenge { .. } => "challenge",
            State::AuthExchange { .. } => "auth_exchange",
            State::Retry { .. } => "retry",
            State::ApiKeyRetry { .. } => "api_key_retry",
            State::Stream { .. } => "stream",
        }
    }
}

struct Attempt<'t> {
    task: &'t DownloadTask,
    origin: String,
    redirects: usize,
    // Each credential is paired with the only origin it may be sent to.
    token: Option<(AccessToken, String)>,
    api_key: Option<(String, String)>,
    exchanged: bool,
}

pub struct FileDownloader<E: TokenExchanger> {
    client: Client,
    exchanger: E,
    config: ClientConfig,
}

impl<E: TokenExchanger> FileDownloader<E> {
    pub fn new(config: &ClientConfig, exchanger: E) -> Result<Self, DatabusError> {
        let client = http::build_client(config.timeout, Redirects::Manual)?;
        Ok(Self {
            client,
            exchanger,
            config: config.clone(),
        })
    }

    fn step(&self, state: State, attempt: &mut Attempt<'_>) -> Result<Transition, DatabusError> {
        let next = match state {
            State::Init => self.init(attempt)?,
            State::Probe { url } | State::Retry { url } | State::ApiKeyRetry { url } => {
                let response = self.issue(&url, attempt)?;
                self.classify(url, response, attempt)?
            }
            State::FollowRedirect { from, location } => {
                attempt.redirects += 1;
                if attempt.redirects > self.config.max_redirects {
                    return Err(DatabusError::RedirectLoop {
                        url: attempt.task.url.clone(),
                        max: self.config.max_redirects,
                    });
                }
                let next = from.join(&location).map_err(|err| {
                    DatabusError::parse(&location, format!("invalid redirect target: {err}"))
                })?;
                debug!(from = %from, to = %next, hop = attempt.redirects, "following redirect");
                State::Probe { url: next }
            }
            State::Challenge { url, challenge } => {
                info!(
                    url = %url,
                    realm = challenge.realm.as_deref().unwrap_or("-"),
                    audience = challenge.audience.as_deref().unwrap_or("-"),
                    "authentication required"
                );
                if attempt.task.vault.is_none() {
                    return Err(no_vault_credential());
                }
                State::AuthExchange { url }
            }
            State::AuthExchange { url } => {
                let credential = attempt.task.vault.as_ref().ok_or_else(no_vault_credential)?;
                let token = self.exchanger.exchange(credential, &url)?;
                attempt.token = Some((token, audience(&url)));
                attempt.exchanged = true;
                State::Retry { url }
            }
            State::Stream { url, response } => {
                return self.stream(url, response, attempt).map(Transition::Done);
            }
        };
        Ok(Transition::Next(next))
    }

    fn init(&self, attempt: &mut Attempt<'_>) -> Result<State, DatabusError> {
        let task = attempt.task;
        let url = Url::parse(&task.url)
            .map_err(|err| DatabusError::parse(&task.url, err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DatabusError::parse(&task.url, "unsupported scheme"));
        }

        if task.destination.file_name().is_none() {
            return Err(DatabusError::Filesystem(format!(
                "destination {} has no file name",
                task.destination
            )));
        }
        if task.destination.is_dir() {
            return Err(DatabusError::Filesystem(format!(
                "destination {} is a directory",
                task.destination
            )));
        }
        if let Some(parent) = task.destination.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| DatabusError::Filesystem(format!("create {parent}: {err}")))?;
        }

        let host = url.host_str().unwrap_or_default();
        if self.config.requires_vault(host, url.port())
            && task.vault.is_none()
            && task.access_token.is_none()
        {
            return Err(no_vault_credential());
        }

        attempt.origin = audience(&url);
        if let Some(token) = &task.access_token {
            attempt.token = Some((token.clone(), attempt.origin.clone()));
        }
        Ok(State::Probe { url })
    }

    fn issue(&self, url: &Url, attempt: &Attempt<'_>) -> Result<Response, DatabusError> {
        let mut request = self.client.get(url.clone());
        if let Some((token, origin)) = &attempt.token {
            if *origin == audience(url) {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token.secret()));
            } else {
                debug!(url = %url, "cross-origin request, bearer token withheld");
            }
        }
        if let Some((key, origin)) = &attempt.api_key {
            if *origin == audience(url) {
                request = request.header(http::API_KEY_HEADER, key.as_str());
            }
        }
        http::send_logged(&self.client, request)
            .map_err(|err| DatabusError::transport(url.as_str(), &err))
    }

    fn classify(
        &self,
        url: Url,
        response: Response,
        attempt: &mut Attempt<'_>,
    ) -> Result<State, DatabusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(State::Stream { url, response });
        }
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            return match location {
                Some(location) => Ok(State::FollowRedirect {
                    from: url,
                    location,
                }),
                None => Err(DatabusError::Http {
                    url: url.to_string(),
                    status: status.as_u16(),
                }),
            };
        }
        if status == StatusCode::UNAUTHORIZED {
            if attempt.exchanged {
                return Err(DatabusError::Auth {
                    message: "vault access token rejected after retry".to_string(),
                    status: Some(status.as_u16()),
                    detail: Some(url.to_string()),
                });
            }
            let challenge = response
                .headers()
                .get_all(WWW_AUTHENTICATE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .find_map(parse_bearer_challenge);
            if let Some(challenge) = challenge {
                return Ok(State::Challenge { url, challenge });
            }
            if attempt.api_key.is_none() && audience(&url) == attempt.origin {
                if let Some(key) = &self.config.api_key {
                    info!(url = %url, "unauthorized, retrying with databus api key");
                    attempt.api_key = Some((key.clone(), attempt.origin.clone()));
                    return Ok(State::ApiKeyRetry { url });
                }
            }
        }
        Err(DatabusError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }

    fn stream(
        &self,
        url: Url,
        mut response: Response,
        attempt: &Attempt<'_>,
    ) -> Result<DownloadOutcome, DatabusError> {
        let task = attempt.task;
        let destination = &task.destination;
        let parent = destination
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .map(|p| p.as_std_path().to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let content_length = response.content_length();

        let mut temp = tempfile::Builder::new()
            .prefix(".databus-")
            .suffix(".part")
            .tempfile_in(&parent)
            .map_err(|err| {
                DatabusError::Filesystem(format!("temp file in {}: {err}", parent.display()))
            })?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| DatabusError::Transport {
                    url: url.to_string(),
                    message: format!("reading body: {err}"),
                })?;
            if read == 0 {
                break;
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| DatabusError::Filesystem(format!("write {destination}: {err}")))?;
            written += read as u64;
        }
        temp.flush()
            .map_err(|err| DatabusError::Filesystem(format!("write {destination}: {err}")))?;

        if destination.exists() {
            fs::remove_file(destination)
                .map_err(|err| DatabusError::Filesystem(format!("replace {destination}: {err}")))?;
        }
        temp.persist(destination)
            .map_err(|err| DatabusError::Filesystem(format!("persist {destination}: {err}")))?;

        let expected = task.declared_length.or(content_length);
        let outcome = DownloadOutcome {
            final_url: url.to_string(),
            destination: destination.clone(),
            bytes_written: written,
            expected_bytes: expected,
            redirects: attempt.redirects,
            authenticated: attempt.exchanged,
        };
        if !outcome.length_matches() {
            warn!(
                url = %url,
                expected = expected.unwrap_or_default(),
                written,
                "downloaded size does not match declared length"
            );
        }
        info!(url = %url, destination = %destination, bytes = written, "downloaded");
        Ok(outcome)
    }
}

impl<E: TokenExchanger> FileFetcher for FileDownloader<E> {
    fn fetch(&self, task: &DownloadTask) -> Result<DownloadOutcome, DatabusError> {
        let mut attempt = Attempt {
            task,
            origin: String::new(),
            redirects: 0,
            token: None,
            api_key: None,
            exchanged: false,
        };
        let mut state = State::Init;
        loop {
            debug!(url = %task.url, state = state.name(), "download step");
            state = match self.step(state, &mut attempt)? {
                Transition::Next(next) => next,
                Transition::Done(outcome) => return Ok(outcome),
            };
        }
    }
}

fn no_vault_credential() -> DatabusError {
    DatabusError::auth("authentication required but no vault credential configured")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge_params() {
        let challenge =
            parse_bearer_challenge(r#"Bearer realm="vault", audience="https://data.example.org""#)
                .unwrap();
        assert_eq!(challenge.realm.as_deref(), Some("vault"));
        assert_eq!(challenge.audience.as_deref(), Some("https://data.example.org"));

        let bare = parse_bearer_challenge("bearer").unwrap();
        assert_eq!(bare, BearerChallenge::default());
    }

    #[test]
    fn non_bearer_challenges_are_ignored() {
        assert!(parse_bearer_challenge(r#"Basic realm="files""#).is_none());
        assert!(parse_bearer_challenge("").is_none());
    }

    #[test]
    fn length_check_tolerates_unknown_length() {
        let mut outcome = DownloadOutcome {
            final_url: "https://h/f".to_string(),
            destination: Utf8PathBuf::from("f"),
            bytes_written: 3,
            expected_bytes: None,
            redirects: 0,
            authenticated: false,
        };
        assert!(outcome.length_matches());
        outcome.expected_bytes = Some(4);
        assert!(!outcome.length_matches());
    }
}
