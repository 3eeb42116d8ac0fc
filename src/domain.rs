use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use url::Url;

use crate::error::DatabusError;
use crate::vault::{AccessToken, VaultCredential};

const COLLECTIONS_SEGMENT: &str = "collections";
const FALLBACK_FILE_NAME: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Granularity {
    Account,
    Group,
    Artifact,
    Version,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyDescriptor {
    scheme: Scheme,
    host: String,
    account: String,
    group: Option<String>,
    artifact: Option<String>,
    version: Option<String>,
    file: Option<String>,
}

impl HierarchyDescriptor {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn granularity(&self) -> Granularity {
        if self.file.is_some() {
            Granularity::File
        } else if self.version.is_some() {
            Granularity::Version
        } else if self.artifact.is_some() {
            Granularity::Artifact
        } else if self.group.is_some() {
            Granularity::Group
        } else {
            Granularity::Account
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }

    pub fn sparql_endpoint(&self) -> String {
        format!("{}/sparql", self.base_url())
    }

    pub fn is_collection(&self) -> bool {
        self.group.as_deref() == Some(COLLECTIONS_SEGMENT)
            && self.artifact.is_some()
            && self.version.is_none()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.account.as_str()).chain(
            [&self.group, &self.artifact, &self.version, &self.file]
                .into_iter()
                .map_while(|segment| segment.as_deref()),
        )
    }

    pub fn uri(&self) -> String {
        let mut uri = self.base_url();
        for segment in self.segments() {
            uri.push('/');
            uri.push_str(segment);
        }
        uri
    }
}

impl fmt::Display for HierarchyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for HierarchyDescriptor {
    type Err = DatabusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DatabusError::parse(value, "empty identifier"));
        }
        let url = Url::parse(trimmed).map_err(|err| DatabusError::parse(value, err.to_string()))?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(DatabusError::parse(
                    value,
                    format!("unsupported scheme {other}"),
                ));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| DatabusError::parse(value, "missing host"))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let segments = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let mut segments = segments.into_iter();
        let account = segments
            .next()
            .ok_or_else(|| DatabusError::parse(value, "missing account segment"))?;
        let group = segments.next();
        let artifact = segments.next();
        let version = segments.next();
        let rest = segments.collect::<Vec<_>>();
        let file = (!rest.is_empty()).then(|| rest.join("/"));

        Ok(Self {
            scheme,
            host,
            account,
            group,
            artifact,
            version,
            file,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabusReference {
    File(HierarchyDescriptor),
    Version(HierarchyDescriptor),
    Artifact(HierarchyDescriptor),
    Group(HierarchyDescriptor),
    Account(HierarchyDescriptor),
    Collection(HierarchyDescriptor),
    Query(String),
}

impl DatabusReference {
    pub fn classify(input: &str, endpoint_configured: bool) -> Result<Self, DatabusError> {
        let trimmed = input.trim();
        if is_http_uri(trimmed) {
            let descriptor: HierarchyDescriptor = trimmed.parse()?;
            return Ok(Self::from_descriptor(descriptor));
        }
        if trimmed.is_empty() {
            return Err(DatabusError::parse(input, "empty identifier"));
        }
        if endpoint_configured {
            return Ok(Self::Query(trimmed.to_string()));
        }
        if looks_like_query(trimmed) {
            return Err(DatabusError::Resolution(
                "query endpoint required to run a literal query".to_string(),
            ));
        }
        Err(DatabusError::parse(input, "not an http(s) identifier"))
    }

    pub fn from_descriptor(descriptor: HierarchyDescriptor) -> Self {
        if descriptor.is_collection() {
            return Self::Collection(descriptor);
        }
        match descriptor.granularity() {
            Granularity::File => Self::File(descriptor),
            Granularity::Version => Self::Version(descriptor),
            Granularity::Artifact => Self::Artifact(descriptor),
            Granularity::Group => Self::Group(descriptor),
            Granularity::Account => Self::Account(descriptor),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Version(_) => "version",
            Self::Artifact(_) => "artifact",
            Self::Group(_) => "group",
            Self::Account(_) => "account",
            Self::Collection(_) => "collection",
            Self::Query(_) => "query",
        }
    }
}

fn is_http_uri(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn looks_like_query(value: &str) -> bool {
    let upper = value.to_ascii_uppercase();
    value.chars().any(char::is_whitespace)
        || ["SELECT", "PREFIX", "CONSTRUCT", "ASK", "DESCRIBE"]
            .iter()
            .any(|keyword| upper.starts_with(keyword))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionFile {
    pub url: String,
    pub relative_path: Utf8PathBuf,
    pub declared_length: Option<u64>,
}

impl DistributionFile {
    pub fn new(url: impl Into<String>, declared_length: Option<u64>) -> Self {
        let url = url.into();
        let relative_path = relative_destination(&url);
        Self {
            url,
            relative_path,
            declared_length,
        }
    }
}

pub fn relative_destination(url: &str) -> Utf8PathBuf {
    if let Ok(descriptor) = url.parse::<HierarchyDescriptor>() {
        if descriptor.granularity() == Granularity::File {
            let mut path = Utf8PathBuf::new();
            for segment in descriptor.segments().flat_map(|s| s.split('/')) {
                if let Some(segment) = safe_segment(segment) {
                    path.push(segment);
                }
            }
            if !path.as_str().is_empty() {
                return path;
            }
        }
    }
    let last = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()
            .map(str::to_string)
    });
    let name = last.as_deref().and_then(safe_segment);
    Utf8PathBuf::from(name.unwrap_or(FALLBACK_FILE_NAME))
}

fn safe_segment(segment: &str) -> Option<&str> {
    match segment {
        "" | "." | ".." => None,
        other if other.contains('\\') => None,
        other => Some(other),
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub reference: String,
    pub url: String,
    pub destination: Utf8PathBuf,
    pub declared_length: Option<u64>,
    pub access_token: Option<AccessToken>,
    pub vault: Option<VaultCredential>,
}

impl DownloadTask {
    pub fn from_file(reference: &str, file: &DistributionFile, root: &Utf8Path) -> Self {
        Self {
            reference: reference.to_string(),
            url: file.url.clone(),
            destination: root.join(&file.relative_path),
            declared_length: file.declared_length,
            access_token: None,
            vault: None,
        }
    }

    pub fn with_vault(mut self, vault: Option<VaultCredential>) -> Self {
        self.vault = vault;
        self
    }
}
