use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::DatabusError;
use crate::http::{self, API_KEY_HEADER, Redirects};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

pub trait QueryClient: Send + Sync {
    fn select_files(&self, endpoint: &str, query: &str) -> Result<Vec<String>, DatabusError>;
}

#[derive(Clone)]
pub struct SparqlHttpClient {
    client: Client,
    api_key: Option<String>,
}

impl SparqlHttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, DatabusError> {
        let client = http::build_client(
            config.timeout,
            Redirects::for_api_key(config.api_key.as_deref()),
        )?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
        })
    }
}

impl QueryClient for SparqlHttpClient {
    fn select_files(&self, endpoint: &str, query: &str) -> Result<Vec<String>, DatabusError> {
        debug!(endpoint, query = %query.replace('\n', " "), "running query");
        let response = http::send_with_retries(&self.client, endpoint, || {
            let request = self
                .client
                .post(endpoint)
                .header(ACCEPT, SPARQL_RESULTS_JSON)
                .form(&[("query", query)]);
            match &self.api_key {
                Some(key) => request.header(API_KEY_HEADER, key.as_str()),
                None => request,
            }
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = http::error_body(response);
            return Err(DatabusError::metadata(
                endpoint,
                format!("query endpoint returned status {status}: {body}"),
            ));
        }
        let results: Value = response
            .json()
            .map_err(|err| DatabusError::metadata(endpoint, format!("invalid results: {err}")))?;
        extract_file_bindings(endpoint, &results)
    }
}

pub fn extract_file_bindings(endpoint: &str, results: &Value) -> Result<Vec<String>, DatabusError> {
    let bindings = results
        .get("results")
        .and_then(|value| value.get("bindings"))
        .and_then(Value::as_array)
        .ok_or_else(|| DatabusError::metadata(endpoint, "missing results.bindings"))?;

    let mut urls = Vec::with_capacity(bindings.len());
    for (row, binding) in bindings.iter().enumerate() {
        let vars = binding.as_object().ok_or_else(|| {
            DatabusError::metadata(endpoint, format!("row {row} is not an object"))
        })?;
        let mut entries = vars.iter();
        match (entries.next(), entries.next()) {
            (None, _) => warn!(endpoint, row, "skipping empty result row"),
            (Some((name, term)), None) => {
                let value = term
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DatabusError::metadata(endpoint, format!("row {row}: ?{name} has no value"))
                    })?;
                urls.push(value.to_string());
            }
            (Some(_), Some(_)) => {
                let names = vars.keys().cloned().collect::<Vec<_>>().join(", ");
                return Err(DatabusError::metadata(
                    endpoint,
                    format!("ambiguous binding in row {row}: {names}"),
                ));
            }
        }
    }
    Ok(urls)
}
