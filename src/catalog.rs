use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::DatabusError;
use crate::graph::MetadataGraph;
use crate::http::{self, API_KEY_HEADER, Redirects};

const JSON_LD: &str = "application/ld+json";
const SPARQL_TEXT: &str = "text/sparql";

pub trait CatalogClient: Send + Sync {
    fn fetch_graph(&self, uri: &str) -> Result<MetadataGraph, DatabusError>;

    fn fetch_collection_query(&self, uri: &str) -> Result<String, DatabusError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    api_key: Option<String>,
}

impl CatalogHttpClient {
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

    fn get_text(&self, uri: &str, accept: &'static str) -> Result<String, DatabusError> {
        let response = http::send_with_retries(&self.client, uri, || {
            let request = self.client.get(uri).header(ACCEPT, accept);
            match &self.api_key {
                Some(key) => request.header(API_KEY_HEADER, key.as_str()),
                None => request,
            }
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = http::error_body(response);
            return Err(DatabusError::metadata(
                uri,
                format!("catalog returned status {status}: {body}"),
            ));
        }
        response
            .text()
            .map_err(|err| DatabusError::metadata(uri, format!("unreadable body: {err}")))
    }
}

impl CatalogClient for CatalogHttpClient {
    fn fetch_graph(&self, uri: &str) -> Result<MetadataGraph, DatabusError> {
        let body = self.get_text(uri, JSON_LD)?;
        let graph = MetadataGraph::parse(uri, &body)?;
        debug!(uri, nodes = graph.len(), "fetched catalog graph");
        Ok(graph)
    }

    fn fetch_collection_query(&self, uri: &str) -> Result<String, DatabusError> {
        let query = self.get_text(uri, SPARQL_TEXT)?;
        if query.trim().is_empty() {
            return Err(DatabusError::metadata(uri, "collection has no stored query"));
        }
        Ok(query)
    }
}
