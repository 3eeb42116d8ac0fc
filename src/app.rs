use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogHttpClient};
use crate::config::ClientConfig;
use crate::domain::{DatabusReference, DistributionFile, DownloadTask};
use crate::download::{DownloadOutcome, FileDownloader, FileFetcher};
use crate::error::DatabusError;
use crate::resolver::Resolver;
use crate::sparql::{QueryClient, SparqlHttpClient};
use crate::vault::{TokenSource, VaultCredential, VaultHttpClient};

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub references: Vec<String>,
    pub local_dir: Option<Utf8PathBuf>,
    pub endpoint: Option<String>,
    pub vault_token_file: Option<PathBuf>,
    pub vault_token_env_var: Option<String>,
    pub auth_url: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub references: Vec<String>,
    pub local_dir: Utf8PathBuf,
    pub endpoint: Option<String>,
    pub vault: Option<VaultCredential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Downloaded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub reference: String,
    pub url: Option<String>,
    pub destination: Option<Utf8PathBuf>,
    pub status: TaskStatus,
    pub bytes_written: Option<u64>,
    pub expected_bytes: Option<u64>,
    pub redirects: usize,
    pub authenticated: bool,
    pub error: Option<String>,
    pub finished_at: String,
}

impl TaskReport {
    fn downloaded(task: &DownloadTask, outcome: DownloadOutcome) -> Self {
        Self {
            reference: task.reference.clone(),
            url: Some(task.url.clone()),
            destination: Some(outcome.destination),
            status: TaskStatus::Downloaded,
            bytes_written: Some(outcome.bytes_written),
            expected_bytes: outcome.expected_bytes,
            redirects: outcome.redirects,
            authenticated: outcome.authenticated,
            error: None,
            finished_at: now(),
        }
    }

    fn failed(reference: &str, task: Option<&DownloadTask>, error: &DatabusError) -> Self {
        Self {
            reference: reference.to_string(),
            url: task.map(|task| task.url.clone()),
            destination: task.map(|task| task.destination.clone()),
            status: TaskStatus::Failed,
            bytes_written: None,
            expected_bytes: task.and_then(|task| task.declared_length),
            redirects: 0,
            authenticated: false,
            error: Some(error.to_string()),
            finished_at: now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Downloaded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub tasks: Vec<TaskReport>,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(TaskReport::is_success)
    }

    pub fn downloaded(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.len() - self.downloaded()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogClient, Q: QueryClient, F: FileFetcher> {
    catalog: C,
    query: Q,
    fetcher: F,
}

impl<C: CatalogClient, Q: QueryClient, F: FileFetcher> App<C, Q, F> {
    pub fn new(catalog: C, query: Q, fetcher: F) -> Self {
        Self {
            catalog,
            query,
            fetcher,
        }
    }

    pub fn download(&self, options: &DownloadOptions, sink: &dyn ProgressSink) -> DownloadReport {
        let resolver = Resolver::new(&self.catalog, &self.query);
        let endpoint = options.endpoint.as_deref();
        let mut report = DownloadReport::default();
        let mut seen = HashSet::new();

        for reference in &options.references {
            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; {reference}"),
                elapsed: None,
            });

            let files = match classify(reference, endpoint).and_then(|classified| {
                info!(reference = %reference, kind = classified.kind(), "classified");
                resolver.resolve(reference, &classified, endpoint)
            }) {
                Ok(files) => files,
                Err(err) => {
                    warn!(reference = %reference, error = %err, "resolution failed");
                    sink.event(ProgressEvent {
                        message: format!("phase=Failed; {reference}: {err}"),
                        elapsed: Some(started.elapsed()),
                    });
                    report.tasks.push(TaskReport::failed(reference, None, &err));
                    continue;
                }
            };
            if files.is_empty() {
                warn!(reference = %reference, "reference resolved to no files");
            }
            info!(reference = %reference, files = files.len(), "resolved");

            for file in files {
                if !seen.insert(file.url.clone()) {
                    info!(url = %file.url, "already scheduled, skipping duplicate");
                    continue;
                }
                let task = self.task_for(reference, &file, options);
                report.tasks.push(self.run_task(&task, sink));
            }
        }

        report
    }

    fn task_for(
        &self,
        reference: &str,
        file: &DistributionFile,
        options: &DownloadOptions,
    ) -> DownloadTask {
        DownloadTask::from_file(reference, file, &options.local_dir)
            .with_vault(options.vault.clone())
    }

    fn run_task(&self, task: &DownloadTask, sink: &dyn ProgressSink) -> TaskReport {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Download; {}", task.url),
            elapsed: None,
        });
        match self.fetcher.fetch(task) {
            Ok(outcome) => {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Done; {} -> {} ({} bytes)",
                        task.url, outcome.destination, outcome.bytes_written
                    ),
                    elapsed: Some(started.elapsed()),
                });
                TaskReport::downloaded(task, outcome)
            }
            Err(err) => {
                warn!(url = %task.url, error = %err, "download failed");
                sink.event(ProgressEvent {
                    message: format!("phase=Failed; {}: {err}", task.url),
                    elapsed: Some(started.elapsed()),
                });
                TaskReport::failed(&task.reference, Some(task), &err)
            }
        }
    }
}

pub fn classify(reference: &str, endpoint: Option<&str>) -> Result<DatabusReference, DatabusError> {
    match DatabusReference::classify(reference, endpoint.is_some()) {
        Err(DatabusError::Parse { .. }) if endpoint.is_some() && !reference.trim().is_empty() => {
            Ok(DatabusReference::Query(reference.trim().to_string()))
        }
        other => other,
    }
}

pub fn resolve_options<L>(
    request: &DownloadRequest,
    config: &ClientConfig,
    lookup: L,
) -> (ClientConfig, DownloadOptions)
where
    L: Fn(&str) -> Option<String>,
{
    let mut config = config.clone();
    if let Some(auth_url) = &request.auth_url {
        config.auth_url = auth_url.clone();
    }
    if let Some(client_id) = &request.client_id {
        config.client_id = client_id.clone();
    }
    if let Some(endpoint) = request.endpoint.as_ref().filter(|e| !e.trim().is_empty()) {
        config.endpoint = Some(endpoint.trim().to_string());
    }

    let token_source = match (&request.vault_token_file, &request.vault_token_env_var) {
        (None, None) if lookup(&config.token_env_var).is_some() => TokenSource {
            file: None,
            env_var: Some(config.token_env_var.clone()),
        },
        (file, env_var) => TokenSource {
            file: file.clone(),
            env_var: env_var.clone(),
        },
    };
    let vault = token_source.is_configured().then(|| VaultCredential {
        token_source,
        auth_url: config.auth_url.clone(),
        client_id: config.client_id.clone(),
    });

    let options = DownloadOptions {
        references: request.references.clone(),
        local_dir: request
            .local_dir
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(".")),
        endpoint: config.endpoint.clone(),
        vault,
    };
    (config, options)
}

pub fn download(
    request: &DownloadRequest,
    config: &ClientConfig,
    sink: &dyn ProgressSink,
) -> Result<DownloadReport, DatabusError> {
    let (config, options) = resolve_options(request, config, |name| std::env::var(name).ok());
    let catalog = CatalogHttpClient::new(&config)?;
    let query = SparqlHttpClient::new(&config)?;
    let fetcher = FileDownloader::new(&config, VaultHttpClient::new(&config)?)?;
    let app = App::new(catalog, query, fetcher);
    Ok(app.download(&options, sink))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
