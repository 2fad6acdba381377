use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use opsgate_core::config::OpsgateConfig;
use opsgate_core::logging::init_tracing;
use opsgate_core::models::{ActionId, CoreError, CoreErrorKind, ProjectId, RunStatus};
use opsgate_core::orchestration::{ActionCoordinator, InvocationOutcome};
use opsgate_core::persistence::{ActionFamily, RunFilter};

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_BUSY: u8 = 3;
const EXIT_DENIED: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "opsgate", version, about = "Single-flight action runner and status reporter")]
struct Cli {
    /// JSON config file; falls back to $OPSGATE_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an action for a project, or report the run already in flight.
    Run {
        #[arg(long)]
        project: String,
        action: String,
    },
    /// Query the run ledger.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    /// Resolve the current status of an action family.
    Status { family: String },
    /// Probe the execution gateway.
    Health,
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        project: Option<String>,
        /// Only actions whose name starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    Show { run_id: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start runtime: {error}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("opsgate: {}", error.message);
            ExitCode::from(exit_code_for_error(&error))
        }
    }
}

async fn run(cli: Cli) -> Result<u8, CoreError> {
    let config = OpsgateConfig::load(cli.config.as_deref())?;
    tracing::debug!(
        ledger = %config.ledger.path.display(),
        gateway = %config.gateway.base_url,
        "configuration loaded"
    );
    let coordinator = ActionCoordinator::from_config(&config)?;

    match cli.command {
        Command::Run { project, action } => {
            let outcome = coordinator
                .invoke(&ProjectId::from(project), &ActionId::from(action))
                .await?;
            print_json(&outcome)?;
            Ok(exit_code_for_outcome(&outcome))
        }
        Command::Runs {
            command:
                RunsCommand::List {
                    limit,
                    project,
                    prefix,
                },
        } => {
            let mut filter = RunFilter::all();
            if let Some(project) = project {
                filter = filter.project(ProjectId::from(project));
            }
            if let Some(prefix) = prefix {
                filter = filter.family(ActionFamily::Prefix(prefix));
            }
            print_json(&coordinator.recent_runs(filter, limit).await)?;
            Ok(EXIT_OK)
        }
        Command::Runs {
            command: RunsCommand::Show { run_id },
        } => match coordinator.run(&run_id).await {
            Some(record) => {
                print_json(&record)?;
                Ok(EXIT_OK)
            }
            None => {
                eprintln!("opsgate: run '{run_id}' not found");
                Ok(EXIT_FAILURE)
            }
        },
        Command::Status { family } => {
            let Some(family) = config.family(&family) else {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("unknown status family '{family}'"),
                ));
            };
            print_json(&coordinator.status(&family).await)?;
            Ok(EXIT_OK)
        }
        Command::Health => {
            let report = coordinator.health().await;
            print_json(&report)?;
            Ok(if report.ok { EXIT_OK } else { EXIT_FAILURE })
        }
    }
}

fn exit_code_for_outcome(outcome: &InvocationOutcome) -> u8 {
    match outcome {
        InvocationOutcome::Completed { record, .. } if record.status == RunStatus::Success => EXIT_OK,
        InvocationOutcome::Completed { .. } => EXIT_FAILURE,
        InvocationOutcome::Busy(_) => EXIT_BUSY,
        InvocationOutcome::Denied(_) => EXIT_DENIED,
    }
}

fn exit_code_for_error(error: &CoreError) -> u8 {
    match error.kind {
        CoreErrorKind::Configuration | CoreErrorKind::InvalidInput | CoreErrorKind::NotAllowlisted => {
            EXIT_USAGE
        }
        _ => EXIT_FAILURE,
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CoreError> {
    let rendered = serde_json::to_string_pretty(value).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to render output: {error}"),
        )
    })?;
    println!("{rendered}");
    Ok(())
}
