use tracing::{debug, info, warn};

use crate::catalog::CatalogClient;
use crate::domain::{DatabusReference, DistributionFile, HierarchyDescriptor};
use crate::error::DatabusError;
use crate::graph::MetadataGraph;
use crate::sparql::QueryClient;

const PART_TYPE: &str = "Part";
const FILE_PROPERTY: &str = "file";

pub struct Resolver<'a> {
    catalog: &'a dyn CatalogClient,
    query: &'a dyn QueryClient,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a dyn CatalogClient, query: &'a dyn QueryClient) -> Self {
        Self { catalog, query }
    }

    // File references are downloaded from `input` exactly as typed.
    pub fn resolve(
        &self,
        input: &str,
        reference: &DatabusReference,
        endpoint: Option<&str>,
    ) -> Result<Vec<DistributionFile>, DatabusError> {
        match reference {
            DatabusReference::File(_) => Ok(vec![DistributionFile::new(input.trim(), None)]),
            DatabusReference::Version(version) => self.version_files(&version.uri()),
            DatabusReference::Artifact(artifact) => self.artifact_files(artifact),
            DatabusReference::Group(group) => self.group_files(group),
            DatabusReference::Collection(collection) => {
                self.collection_files(collection, endpoint)
            }
            DatabusReference::Query(query) => {
                let endpoint = endpoint.ok_or_else(|| {
                    DatabusError::Resolution(
                        "query endpoint required to run a literal query".to_string(),
                    )
                })?;
                self.query_files(endpoint, query)
            }
            DatabusReference::Account(account) => Err(DatabusError::Resolution(format!(
                "account-level identifiers are not supported: {account}"
            ))),
        }
    }

    pub fn artifact_files(
        &self,
        artifact: &HierarchyDescriptor,
    ) -> Result<Vec<DistributionFile>, DatabusError> {
        let artifact_uri = artifact.uri();
        let graph = self.catalog.fetch_graph(&artifact_uri)?;
        let latest = latest_version_id(&graph, &artifact_uri).ok_or_else(|| {
            DatabusError::Resolution(format!("no versions found for artifact {artifact_uri}"))
        })?;
        info!(artifact = %artifact_uri, version = latest, "no version given, using latest");
        self.version_files(latest)
    }

    pub fn version_files(&self, version_uri: &str) -> Result<Vec<DistributionFile>, DatabusError> {
        let graph = self.catalog.fetch_graph(version_uri)?;
        Ok(part_files(&graph, version_uri))
    }

    // Artifacts that fail to resolve or have no versions are skipped.
    pub fn group_files(
        &self,
        group: &HierarchyDescriptor,
    ) -> Result<Vec<DistributionFile>, DatabusError> {
        let group_uri = group.uri();
        let graph = self.catalog.fetch_graph(&group_uri)?;
        let artifacts = graph
            .children_of(&group_uri)
            .into_iter()
            .map(|node| node.id().to_string())
            .collect::<Vec<_>>();
        debug!(group = %group_uri, artifacts = artifacts.len(), "enumerated group");

        let mut files = Vec::new();
        for artifact_uri in artifacts {
            match self.latest_files(&artifact_uri) {
                Ok(Some(latest)) => files.extend(latest),
                Ok(None) => warn!(artifact = %artifact_uri, "skipping artifact without versions"),
                Err(err) => warn!(artifact = %artifact_uri, error = %err, "skipping artifact"),
            }
        }
        Ok(files)
    }

    fn latest_files(
        &self,
        artifact_uri: &str,
    ) -> Result<Option<Vec<DistributionFile>>, DatabusError> {
        let graph = self.catalog.fetch_graph(artifact_uri)?;
        let Some(latest) = latest_version_id(&graph, artifact_uri) else {
            return Ok(None);
        };
        info!(artifact = %artifact_uri, version = latest, "using latest version");
        self.version_files(latest).map(Some)
    }

    pub fn collection_files(
        &self,
        collection: &HierarchyDescriptor,
        endpoint: Option<&str>,
    ) -> Result<Vec<DistributionFile>, DatabusError> {
        let query = self.catalog.fetch_collection_query(&collection.uri())?;
        let detected;
        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None => {
                detected = collection.sparql_endpoint();
                info!(endpoint = %detected, "using catalog query endpoint");
                detected.as_str()
            }
        };
        self.query_files(endpoint, &query)
    }

    pub fn query_files(
        &self,
        endpoint: &str,
        query: &str,
    ) -> Result<Vec<DistributionFile>, DatabusError> {
        let urls = self.query.select_files(endpoint, query)?;
        Ok(urls
            .into_iter()
            .map(|url| DistributionFile::new(url, None))
            .collect())
    }
}

// Plain string order: `"9"` beats `"10"`.
pub fn latest_version_id<'g>(graph: &'g MetadataGraph, artifact_uri: &str) -> Option<&'g str> {
    select_latest(graph.children_of(artifact_uri).into_iter().map(|node| node.id()))
}

pub fn select_latest<'s>(candidates: impl IntoIterator<Item = &'s str>) -> Option<&'s str> {
    candidates.into_iter().max()
}

pub fn part_files(graph: &MetadataGraph, version_uri: &str) -> Vec<DistributionFile> {
    graph
        .typed_under(version_uri, PART_TYPE)
        .into_iter()
        .filter_map(|part| match part.reference(FILE_PROPERTY) {
            Some(url) => Some(DistributionFile::new(url, part.byte_size())),
            None => {
                warn!(part = part.id(), "part without file reference");
                None
            }
        })
        .collect()
}
