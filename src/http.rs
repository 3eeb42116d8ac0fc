use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::error::DatabusError;

pub const API_KEY_HEADER: &str = "x-api-key";

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;
const MAX_ERROR_BODY: usize = 512;

const MAX_FOLLOWED_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    Manual,
    Follow,
    SameOrigin,
}

impl Redirects {
    // Custom headers such as the API key survive reqwest's cross-host redirects.
    pub fn for_api_key(api_key: Option<&str>) -> Self {
        if api_key.is_some() {
            Redirects::SameOrigin
        } else {
            Redirects::Follow
        }
    }

    fn policy(self) -> Policy {
        match self {
            Redirects::Manual => Policy::none(),
            Redirects::Follow => Policy::limited(MAX_FOLLOWED_REDIRECTS),
            Redirects::SameOrigin => Policy::custom(|attempt| {
                if attempt.previous().len() >= MAX_FOLLOWED_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                let leaves_origin = attempt
                    .previous()
                    .last()
                    .is_some_and(|from| from.origin() != attempt.url().origin());
                if leaves_origin {
                    debug!(to = %attempt.url(), "not following cross-origin redirect");
                    attempt.stop()
                } else {
                    attempt.follow()
                }
            }),
        }
    }
}

pub fn build_client(timeout: Duration, redirects: Redirects) -> Result<Client, DatabusError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("databus-client/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| DatabusError::Transport {
                url: String::new(),
                message: err.to_string(),
            })?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .redirect(redirects.policy())
        .build()
        .map_err(|err| DatabusError::Transport {
            url: String::new(),
            message: err.to_string(),
        })
}

pub fn send_logged(client: &Client, builder: RequestBuilder) -> Result<Response, reqwest::Error> {
    let request = builder.build()?;
    debug!(
        method = %request.method(),
        url = %request.url(),
        headers = %redact_headers(request.headers()),
        "[HTTP] {} {}",
        request.method(),
        request.url()
    );
    let response = client.execute(request)?;
    debug!(status = response.status().as_u16(), url = %response.url(), "[HTTP] response");
    Ok(response)
}

// Catalog and query reads only, never file bodies.
pub fn send_with_retries<F>(
    client: &Client,
    url: &str,
    mut make_req: F,
) -> Result<Response, DatabusError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match send_logged(client, make_req()) {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                    thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                    continue;
                }
                return Err(DatabusError::transport(url, &err));
            }
        }
    }
}

pub fn redact_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_secret_header(name.as_str()) {
                "REDACTED"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{}: {shown}", name.as_str())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_secret_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) || name.eq_ignore_ascii_case(API_KEY_HEADER)
}

pub fn error_body(response: Response) -> String {
    let text = response.text().unwrap_or_default();
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
