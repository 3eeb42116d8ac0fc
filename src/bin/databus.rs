use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use databus_client::app::{self, DownloadRequest};
use databus_client::config::ConfigLoader;
use databus_client::error::DatabusError;
use databus_client::output::{JsonOutput, OutputMode, StderrProgress};

#[derive(Parser)]
#[command(name = "databus")]
#[command(about = "Download files from a Databus catalog by identifier, collection or query")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve references and download the files they denote")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(
        required = true,
        help = "File, version, artifact, group or collection URIs, or query text"
    )]
    references: Vec<String>,

    #[arg(long)]
    localdir: Option<Utf8PathBuf>,

    #[arg(long, help = "Query endpoint used for literal queries and collections")]
    databus: Option<String>,

    #[arg(long, help = "File holding the Vault refresh token")]
    vault_token: Option<PathBuf>,

    #[arg(long, help = "Environment variable holding the Vault refresh token")]
    vault_token_env: Option<String>,

    #[arg(long)]
    authurl: Option<String>,

    #[arg(long)]
    clientid: Option<String>,

    #[arg(long, help = "Databus API key, sent as X-API-KEY")]
    apikey: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<DatabusError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &DatabusError) -> u8 {
    match error {
        DatabusError::Parse { .. }
        | DatabusError::ConfigRead(_)
        | DatabusError::ConfigParse(_) => 2,
        DatabusError::Metadata { .. }
        | DatabusError::Auth { .. }
        | DatabusError::Http { .. }
        | DatabusError::RedirectLoop { .. }
        | DatabusError::Transport { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Download(args) => run_download(args),
    }
}

fn run_download(args: DownloadArgs) -> miette::Result<ExitCode> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(key) = args.apikey.filter(|key| !key.trim().is_empty()) {
        config.api_key = Some(key);
    }
    let mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let request = DownloadRequest {
        references: args.references,
        local_dir: args.localdir,
        endpoint: args.databus,
        vault_token_file: args.vault_token,
        vault_token_env_var: args.vault_token_env,
        auth_url: args.authurl,
        client_id: args.clientid,
    };

    let report = match mode {
        OutputMode::Json => {
            let report = app::download(&request, &config, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            report
        }
        OutputMode::Human => {
            let report = app::download(&request, &config, &StderrProgress)?;
            StderrProgress::print_summary(&report).into_diagnostic()?;
            report
        }
    };

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
