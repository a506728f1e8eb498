mod config;
mod logging;

use anyhow::Context;
use clap::{command, value_parser, Arg, ArgAction, Command};
use config::{Action, Config};
use logging::{init_logging, log_failure, log_success};
use std::path::PathBuf;
use std::process::ExitCode;
use sysbot::{with_session, Connector, ExecutionRequest, ExecutionResult, SshConnector};
use tracing::warn;

/// Conventional exit code for a command cut off by a deadline, as timeout(1) uses.
const EXIT_TIMED_OUT: u8 = 124;

pub fn cli() -> Command {
    command!()
        .about("Run commands and move files on remote hosts over SSH")
        .subcommand_required(true)
        .arg(
            Arg::new("host")
                .long("host")
                .short('H')
                .required(true)
                .help("Target host, optionally host:port"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .value_parser(value_parser!(u16).range(1..))
                .help("Port when --host carries none [default: 22]"),
        )
        .arg(Arg::new("login").long("login").short('l'))
        .arg(
            Arg::new("password")
                .long("password")
                .env("SYSBOT_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("JSON settings file"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .short('t')
                .value_parser(value_parser!(u64))
                .help("Output collection timeout in seconds"),
        )
        .arg(
            Arg::new("shell")
                .long("shell")
                .help("Remote shell: bash, powershell or python [default: bash]"),
        )
        .arg(
            Arg::new("jump")
                .long("jump")
                .short('J')
                .action(ArgAction::Append)
                .help("Jump host as [login@]host[:port], repeat for more hops"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("More logging, repeat for more"),
        )
        .subcommand(
            Command::new("exec")
                .about("Run a command, or stage and run a script")
                .arg(Arg::new("command").conflicts_with("script"))
                .arg(
                    Arg::new("script")
                        .long("script")
                        .short('s')
                        .value_parser(value_parser!(PathBuf))
                        .help("Local script to stage and run"),
                )
                .arg(
                    Arg::new("script-path")
                        .long("script-path")
                        .requires("script")
                        .help("Remote staging path for the script"),
                )
                .arg(Arg::new("runas").long("runas").action(ArgAction::SetTrue))
                .arg(
                    Arg::new("fetch-result")
                        .long("fetch-result")
                        .requires("script")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the standardized JSON response"),
                ),
        )
        .subcommand(
            Command::new("push")
                .about("Copy a local file to the remote host (mode 0755)")
                .arg(
                    Arg::new("local")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(Arg::new("remote")),
        )
        .subcommand(
            Command::new("read")
                .about("Print a remote file")
                .arg(Arg::new("remote")),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a remote file")
                .arg(Arg::new("remote").required(true))
                .arg(
                    Arg::new("ignore-missing")
                        .long("ignore-missing")
                        .action(ArgAction::SetTrue),
                ),
        )
}

/// Everything an action needs once the session is up.
enum Job {
    Exec(ExecutionRequest),
    Push { content: String, remote: Option<String> },
    Read { remote: Option<String> },
    Delete { remote: String, ignore_missing: bool },
}

enum Outcome {
    Executed(ExecutionResult),
    Pushed(String),
    Read(String),
    Deleted { path: String, existed: bool },
}

async fn prepare(action: &Action) -> anyhow::Result<Job> {
    Ok(match action {
        Action::Exec {
            command,
            script,
            script_path,
            runas,
            fetch_result,
            ..
        } => {
            let mut request = match (command, script) {
                (_, Some(path)) => ExecutionRequest::script(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                (Some(command), None) => ExecutionRequest::inline(command.as_str()),
                (None, None) => anyhow::bail!("nothing to execute"),
            };
            if *runas {
                request = request.runas();
            }
            if *fetch_result {
                request = request.fetch_result();
            }
            if let Some(path) = script_path {
                request = request.script_path(path.as_str());
            }
            Job::Exec(request)
        }
        Action::Push { local, remote } => Job::Push {
            content: tokio::fs::read_to_string(local)
                .await
                .with_context(|| format!("reading {}", local.display()))?,
            remote: remote.clone(),
        },
        Action::Read { remote } => Job::Read {
            remote: remote.clone(),
        },
        Action::Delete {
            remote,
            ignore_missing,
        } => Job::Delete {
            remote: remote.clone(),
            ignore_missing: *ignore_missing,
        },
    })
}

async fn dispatch(
    connector: &SshConnector,
    session: &mut sysbot::SshSession,
    job: Job,
) -> sysbot::Result<Outcome> {
    match job {
        Job::Exec(request) => connector
            .execute_command(session, &request)
            .await
            .map(Outcome::Executed),
        Job::Push { content, remote } => connector
            .push_file(session, &content, remote.as_deref())
            .await
            .map(Outcome::Pushed),
        Job::Read { remote } => connector
            .read_file(session, remote.as_deref())
            .await
            .map(Outcome::Read),
        Job::Delete {
            remote,
            ignore_missing,
        } => match connector.delete_file(session, &remote).await {
            Ok(()) => Ok(Outcome::Deleted {
                path: remote,
                existed: true,
            }),
            Err(e) if ignore_missing && e.is_not_found() => Ok(Outcome::Deleted {
                path: remote,
                existed: false,
            }),
            Err(e) => Err(e),
        },
    }
}

fn exit_code(result: &ExecutionResult) -> u8 {
    if result.timed_out {
        return EXIT_TIMED_OUT;
    }
    match result.exit_status {
        Some(status) => u8::try_from(status).unwrap_or(u8::MAX),
        None => 1,
    }
}

fn report(outcome: Outcome, json: bool) -> anyhow::Result<ExitCode> {
    match outcome {
        Outcome::Executed(result) => {
            let code = ExitCode::from(exit_code(&result));
            if result.timed_out {
                warn!("command did not finish before the collection deadline");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&result.into_response())?);
            } else {
                print!("{}", result.output);
                eprint!("{}", result.error);
                if let Some(content) = &result.result {
                    println!("{}", content);
                }
                if let Some(path) = &result.script_path {
                    log_success("staged script", path);
                }
            }
            Ok(code)
        }
        Outcome::Pushed(path) => {
            log_success("pushed file", &path);
            println!("{}", path);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Read(content) => {
            print!("{}", content);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Deleted { path, existed } => {
            if existed {
                log_success("deleted file", &path);
            } else {
                warn!(%path, "nothing to delete");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let settings = config.settings().await?;
    let connector = SshConnector::from_config(&settings, config.shell)?;
    let json = matches!(config.action, Action::Exec { json: true, .. });
    let job = prepare(&config.action).await?;

    let outcome = with_session(&connector, &config.target, &config.credentials, move |c, s| {
        Box::pin(async move { dispatch(c, s, job).await })
    })
    .await
    .with_context(|| format!("operation on {} failed", config.target))?;

    report(outcome, json)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    let config = match Config::try_from(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };
    init_logging(config.verbosity);

    let target = config.target.clone();
    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            log_failure("run", &target, &e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
