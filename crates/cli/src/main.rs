//! arcrest - command line client for the ARC CE REST interface.
//!
//! Composition root of the workspace: builds the HTTPS transport from
//! [`config::ClientConfig`], negotiates the API version, and drives the
//! protocol client and transfer engine. Batch commands print one line per
//! job and exit non-zero if any job failed.

mod config;
mod telemetry;

use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use ce::{ArcError, Connector, DelegationId, Job, JobId, JobInfo, OutputFilter, DEFAULT_DIAGNOSE_DIR};
use clap::{Parser, Subcommand};
use rest::{DelegationCredential, DelegationManager, ItemResult, Negotiator, ProtocolClient};
use tracing::{debug, info};
use transfer::{DownloadJob, TransferEngine};
use transport::HttpsConnector;

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "arcrest")]
#[command(about = "Client for the ARC Computing Element REST interface")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List API versions advertised by the CE
    Versions,

    #[command(flatten)]
    Ce(CeCommand),
}

/// Commands that run against a negotiated API version.
#[derive(Subcommand)]
enum CeCommand {
    /// Print the CE capability document
    Info,

    /// List IDs of your jobs
    Jobs,

    /// Print job states
    Status {
        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,
    },

    /// Print job metadata as JSON
    JobInfo {
        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,
    },

    /// Cancel jobs
    Kill {
        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,
    },

    /// Remove finished jobs from the CE
    Clean {
        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,
    },

    /// Restart failed jobs
    Restart {
        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,
    },

    /// List your delegations, or the delegations used by the given jobs
    Delegations {
        #[arg(value_parser = parse_job_id)]
        jobs: Vec<JobId>,
    },

    /// Manage a token delegation
    Delegation {
        #[command(subcommand)]
        action: DelegationAction,
    },

    /// Download job outputs into <dir>/<job id>/
    Download {
        dir: PathBuf,

        #[arg(required = true, value_parser = parse_job_id)]
        ids: Vec<JobId>,

        /// Only fetch matching session paths; a trailing `/` selects a directory
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Also fetch diagnose files into <dir>/<job id>/gmlog
        #[arg(long)]
        diagnose: bool,
    },

    /// Upload input files of a submitted job
    Upload {
        #[arg(value_parser = parse_job_id)]
        id: JobId,

        /// Inputs as <session name>=<local path>
        #[arg(required = true, value_parser = parse_input)]
        inputs: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum DelegationAction {
    /// Create a delegation from the configured token
    New,
    /// Renew a delegation with the configured token
    Renew {
        #[arg(value_parser = parse_delegation_id)]
        id: DelegationId,
    },
    /// Delete a delegation
    Delete {
        #[arg(value_parser = parse_delegation_id)]
        id: DelegationId,
    },
}

fn parse_job_id(value: &str) -> Result<JobId, String> {
    JobId::new(value).ok_or_else(|| "job ID must not be empty".to_string())
}

fn parse_delegation_id(value: &str) -> Result<DelegationId, String> {
    DelegationId::new(value).ok_or_else(|| "delegation ID must not be empty".to_string())
}

fn parse_input(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), path.to_string()))
        }
        _ => Err(format!("expected <name>=<path>, got {value:?}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match telemetry::init(cli.config.log_format) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    };
    telemetry.shutdown();
    code
}

/// Runs one command. `Ok(false)` means the call worked but some jobs failed.
async fn run(cli: Cli) -> Result<bool> {
    let config = cli.config;
    let connector: Arc<dyn Connector> = Arc::new(HttpsConnector::new(config.transport_config()?));
    let negotiator = Negotiator::new(connector.connect()?, config.api_base.clone());

    match cli.command {
        Commands::Versions => {
            for line in versions(&negotiator).await? {
                println!("{line}");
            }
            Ok(true)
        }
        Commands::Ce(command) => {
            let client = negotiator.bind(config.api_version.as_deref()).await?;
            info!(url = %config.url, version = %client.version(), "connected");
            execute(command, client, connector, &config).await
        }
    }
}

/// Advertised versions, marking those this client cannot speak.
async fn versions(negotiator: &Negotiator) -> Result<Vec<String>, ArcError> {
    Ok(negotiator
        .discover()
        .await?
        .into_iter()
        .map(|version| match ce::ApiVersion::from_advertised(&version) {
            Some(_) => version,
            None => format!("{version} (unsupported)"),
        })
        .collect())
}

async fn execute(
    command: CeCommand,
    client: ProtocolClient,
    connector: Arc<dyn Connector>,
    config: &ClientConfig,
) -> Result<bool> {
    match command {
        CeCommand::Info => {
            let document = client.ce_info().await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(true)
        }
        CeCommand::Jobs => {
            for id in client.list_jobs().await? {
                println!("{id}");
            }
            Ok(true)
        }
        CeCommand::Status { ids } => {
            let results = client.job_status(&ids).await?;
            Ok(print_results(&ids, results))
        }
        CeCommand::JobInfo { ids } => {
            let results = ids
                .iter()
                .zip(client.job_info(&ids).await?)
                .map(|(id, result)| result.and_then(|info| render_info(id, info)))
                .collect();
            Ok(print_results(&ids, results))
        }
        CeCommand::Kill { ids } => Ok(print_results(&ids, ok_marks(client.kill_jobs(&ids).await?))),
        CeCommand::Clean { ids } => Ok(print_results(&ids, ok_marks(client.clean_jobs(&ids).await?))),
        CeCommand::Restart { ids } => Ok(print_results(&ids, ok_marks(client.restart_jobs(&ids).await?))),
        CeCommand::Delegations { jobs } if jobs.is_empty() => {
            for delegation in client.list_delegations().await? {
                println!("{} {:?}", delegation.id, delegation.kind);
            }
            Ok(true)
        }
        CeCommand::Delegations { jobs } => {
            let results = client
                .job_delegations(&jobs)
                .await?
                .into_iter()
                .map(|result| result.map(|ids| ids.iter().map(DelegationId::as_str).collect::<Vec<_>>().join(",")))
                .collect();
            Ok(print_results(&jobs, results))
        }
        CeCommand::Delegation { action } => {
            delegation(&client, config.token.as_deref(), action).await?;
            Ok(true)
        }
        CeCommand::Download {
            dir,
            ids,
            filters,
            diagnose,
        } => {
            let engine = TransferEngine::new(client, connector).with_workers(config.workers);
            let jobs: Vec<DownloadJob> = ids
                .iter()
                .map(|id| {
                    let job = DownloadJob::new(id.clone()).with_filter(OutputFilter::new(&filters));
                    if diagnose {
                        job.with_diagnose_dir(format!("{id}/{DEFAULT_DIAGNOSE_DIR}"))
                    } else {
                        job.with_diagnose_files(Vec::<String>::new())
                    }
                })
                .collect();
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
            let errors = engine.download(&dir, &jobs).await;
            Ok(print_errors(&ids, &errors))
        }
        CeCommand::Upload { id, inputs } => {
            let engine = TransferEngine::new(client, connector).with_workers(config.workers);
            let mut job = Job::new(id.clone(), None);
            job.input_files = inputs.into_iter().map(|(name, path)| (name, Some(path))).collect();
            debug!(job = %id, inputs = job.input_files.len(), "uploading inputs");
            let errors = engine.upload(std::slice::from_ref(&job)).await;
            Ok(print_errors(std::slice::from_ref(&id), &errors))
        }
    }
}

async fn delegation(client: &ProtocolClient, token: Option<&str>, action: DelegationAction) -> Result<()> {
    match action {
        DelegationAction::New => {
            let id = token_manager(client, token)?.create(None).await?;
            println!("{id}");
        }
        DelegationAction::Renew { id } => {
            token_manager(client, token)?.refresh(&id, None).await?;
            println!("{id} renewed");
        }
        DelegationAction::Delete { id } => {
            client.delete_delegation(&id).await?;
            println!("{id} deleted");
        }
    }
    Ok(())
}

/// No certificate signer is bundled, so only token delegations can be issued.
fn token_manager<'a>(client: &'a ProtocolClient, token: Option<&str>) -> Result<DelegationManager<'a>, ArcError> {
    let token = token.ok_or_else(|| ArcError::Authentication {
        message: "proxy delegations need a certificate signer; set --token for a token delegation".into(),
    })?;
    Ok(DelegationManager::new(client, DelegationCredential::Token(token.to_string())))
}

/// Renders the state and JSON metadata of one job.
fn render_info(id: &JobId, info: JobInfo) -> ItemResult<String> {
    let mut job = Job::new(id.clone(), None);
    job.update_from_info(info);
    let state = job.state.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
    let json = serde_json::to_string(&job.info).map_err(|e| ArcError::protocol(e.to_string()))?;
    Ok(format!("{state} {json}"))
}

fn ok_marks(results: Vec<ItemResult<()>>) -> Vec<ItemResult<&'static str>> {
    results.into_iter().map(|result| result.map(|()| "ok")).collect()
}

/// Prints `<id> <value>` or `<id> error: <error>` per job; `true` if all succeeded.
fn print_results<T: Display>(ids: &[JobId], results: Vec<ItemResult<T>>) -> bool {
    let mut all_ok = true;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(value) => println!("{id} {value}"),
            Err(e) => {
                all_ok = false;
                println!("{id} error: {e}");
            }
        }
    }
    all_ok
}

fn print_errors(ids: &[JobId], errors: &[Vec<ArcError>]) -> bool {
    let mut all_ok = true;
    for (id, job_errors) in ids.iter().zip(errors) {
        if job_errors.is_empty() {
            println!("{id} ok");
            continue;
        }
        all_ok = false;
        for e in job_errors {
            println!("{id} error: {e}");
        }
    }
    all_ok
}

#[cfg(test)]
mod tests {
    use rest::testing::{json_response, FakeTransport};

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["arcrest", "--url", "ce.example.org"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn input_pairs_split_on_first_equals() {
        assert_eq!(
            parse_input("data/in.txt=/home/u/a=b.txt").unwrap(),
            ("data/in.txt".to_string(), "/home/u/a=b.txt".to_string())
        );
        assert!(parse_input("no-equals").is_err());
        assert!(parse_input("=path").is_err());
    }

    #[test]
    fn download_takes_repeated_filters() {
        let cli = parse(&["download", "out", "j1", "j2", "--filter", "a/", "--filter", "b.txt"]);
        match cli.command {
            Commands::Ce(CeCommand::Download { ids, filters, diagnose, .. }) => {
                assert_eq!(ids.len(), 2);
                assert_eq!(filters, vec!["a/", "b.txt"]);
                assert!(!diagnose);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn status_requires_ids() {
        let argv = ["arcrest", "--url", "ce.example.org", "status"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn delegation_subcommands_parse() {
        let cli = parse(&["delegation", "renew", "d-1"]);
        assert!(matches!(
            cli.command,
            Commands::Ce(CeCommand::Delegation { action: DelegationAction::Renew { ref id } }) if id.as_str() == "d-1"
        ));
    }

    #[test]
    fn versions_is_the_only_command_without_a_bound_client() {
        assert!(matches!(parse(&["versions"]).command, Commands::Versions));
        assert!(matches!(parse(&["jobs"]).command, Commands::Ce(CeCommand::Jobs)));
        assert!(matches!(parse(&["info"]).command, Commands::Ce(CeCommand::Info)));
    }

    #[tokio::test]
    async fn versions_marks_unsupported_entries() {
        let transport = FakeTransport::new(|_| Ok(json_response(200, serde_json::json!({"version": ["1.0", "1.1", "2.0"]}))));
        let negotiator = Negotiator::new(transport.clone(), "/arex");

        let lines = versions(&negotiator).await.unwrap();

        assert_eq!(lines, vec!["1.0", "1.1", "2.0 (unsupported)"]);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn failed_items_are_reported_per_job() {
        let ids = vec![JobId::new("a").unwrap(), JobId::new("b").unwrap()];
        let results = vec![Ok("ok"), Err(ArcError::protocol("gone"))];
        assert!(!print_results(&ids, results));
        assert!(print_errors(&ids, &[Vec::new(), Vec::new()]));
    }

    #[tokio::test]
    async fn proxy_delegation_without_signer_is_an_authentication_error() {
        let transport = FakeTransport::new(|_| Ok(json_response(500, serde_json::json!({}))));
        let client = ProtocolClient::new(ce::ApiVersion::V1_1, "/arex", transport.clone());

        let err = delegation(&client, None, DelegationAction::New).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ArcError>(), Some(ArcError::Authentication { .. })));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn job_info_line_leads_with_state() {
        let info = JobInfo {
            state: Some(ce::JobState::parse("FINISHED")),
            name: Some("hello".into()),
            ..JobInfo::default()
        };
        let line = render_info(&JobId::new("j").unwrap(), info).unwrap();
        assert!(line.starts_with("FINISHED {"));
        assert!(line.contains("\"name\":\"hello\""));
    }
}
