//! # Command-Line Interface / 命令行接口
//!
//! Builds the `matrix-orchestrator` command tree and dispatches to the
//! subcommands. Every subcommand returns the process exit code.
//!
//! 构建 `matrix-orchestrator` 命令树并分发到各个子命令。每个子命令都返回进程退出码。

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use crate::core::config::CONFIG_FILE_NAME;
use crate::core::error::ConfigurationError;
use crate::core::models::{EXIT_CONFIGURATION_ERROR, EXIT_INTERNAL_ERROR};
use crate::core::pipeline::JobSelection;
use crate::core::trigger::EventKind;
use crate::infra::logging::{LogFormat, init_tracing, level_for_verbosity};

pub mod commands;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help("Path to the pipeline declaration")
        .value_name("CONFIG")
        .default_value(CONFIG_FILE_NAME)
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn trigger_args() -> [Arg; 3] {
    [
        Arg::new("event")
            .long("event")
            .help("Triggering event (push or pull_request). Defaults to GITHUB_EVENT_NAME")
            .value_name("EVENT")
            .value_parser(["push", "pull_request"])
            .action(ArgAction::Set),
        Arg::new("source-branch")
            .long("source-branch")
            .help("Branch that was pushed, or the head branch of the pull request")
            .value_name("BRANCH")
            .action(ArgAction::Set),
        Arg::new("target-branch")
            .long("target-branch")
            .help("Branch the pull request targets. Defaults to GITHUB_BASE_REF")
            .value_name("BRANCH")
            .action(ArgAction::Set),
    ]
}

fn selection_args() -> [Arg; 4] {
    [
        Arg::new("os")
            .long("os")
            .help("Only run jobs on this operating system")
            .value_name("OS")
            .action(ArgAction::Set),
        Arg::new("runtime")
            .long("runtime")
            .help("Only run jobs with this declared runtime version")
            .value_name("VERSION")
            .action(ArgAction::Set),
        Arg::new("framework")
            .long("framework")
            .help("Only run jobs with this framework version")
            .value_name("VERSION")
            .action(ArgAction::Set),
        Arg::new("job")
            .long("job")
            .help("Only run the job with this number or slug")
            .value_name("JOB")
            .action(ArgAction::Set),
    ]
}

pub fn build_cli() -> Command {
    Command::new("matrix-orchestrator")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Expands a CI test matrix, installs layered dependencies, runs grouped tests and submits coverage")
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .help("Format of diagnostic logs on stderr")
                .value_name("FORMAT")
                .value_parser(["text", "json"])
                .default_value("text")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase diagnostic verbosity (-v, -vv, -vvv)")
                .global(true)
                .action(ArgAction::Count),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the resolved job matrix without running anything")
                .arg(config_arg())
                .args(trigger_args())
                .arg(
                    Arg::new("format")
                        .long("format")
                        .help("Output format")
                        .value_name("FORMAT")
                        .value_parser(["text", "json"])
                        .default_value("text")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run the selected jobs of the matrix")
                .arg(config_arg())
                .args(trigger_args())
                .args(selection_args())
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help("Number of jobs to run concurrently")
                        .value_name("JOBS")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("project-dir")
                        .long("project-dir")
                        .help("Root of the project under test")
                        .value_name("PROJECT_DIR")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("work-dir")
                        .long("work-dir")
                        .help("Directory for per-job environments and artifacts")
                        .value_name("WORK_DIR")
                        .default_value(".matrix")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("html")
                        .long("html")
                        .help("Write an HTML report of the matrix to this path")
                        .value_name("HTML")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("no-submit")
                        .long("no-submit")
                        .help("Do not submit coverage, whatever the config says")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Coverage service token")
                        .value_name("TOKEN")
                        .env("COVERALLS_REPO_TOKEN")
                        .hide_env_values(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("commit")
                        .long("commit")
                        .help("Commit sha the coverage belongs to")
                        .value_name("SHA")
                        .env("GITHUB_SHA")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("repository")
                        .long("repository")
                        .help("owner/name of the repository")
                        .value_name("REPOSITORY")
                        .env("GITHUB_REPOSITORY")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("run-id")
                        .long("run-id")
                        .help("Workflow run identifier")
                        .value_name("RUN_ID")
                        .env("GITHUB_RUN_ID")
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("init")
                .about("Create a Pipeline.toml for the current project")
                .arg(
                    Arg::new("non-interactive")
                        .long("non-interactive")
                        .help("Create a default config file without launching the interactive wizard.")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing config file without asking")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Where to write the config")
                        .value_name("PATH")
                        .default_value(CONFIG_FILE_NAME)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                ),
        )
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn path_arg(matches: &ArgMatches, id: &str) -> PathBuf {
    matches.get_one::<PathBuf>(id).cloned().unwrap_or_default()
}

/// Trigger flags as given on the command line.
pub struct TriggerArgs {
    pub kind: Option<EventKind>,
    pub source: Option<String>,
    pub target: Option<String>,
}

fn trigger_from(matches: &ArgMatches) -> Result<TriggerArgs> {
    let kind = match matches.get_one::<String>("event") {
        Some(kind) => Some(kind.parse::<EventKind>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    Ok(TriggerArgs {
        kind,
        source: string_arg(matches, "source-branch"),
        target: string_arg(matches, "target-branch"),
    })
}

async fn dispatch(matches: &ArgMatches) -> Result<u8> {
    match matches.subcommand() {
        Some(("plan", plan_matches)) => {
            let trigger = trigger_from(plan_matches)?;
            let json = plan_matches.get_one::<String>("format").map(String::as_str) == Some("json");
            commands::plan::execute(&path_arg(plan_matches, "config"), trigger, json)
        }
        Some(("run", run_matches)) => {
            let options = commands::run::RunOptions {
                config: path_arg(run_matches, "config"),
                trigger: trigger_from(run_matches)?,
                selection: JobSelection {
                    os: string_arg(run_matches, "os"),
                    runtime: string_arg(run_matches, "runtime"),
                    framework: string_arg(run_matches, "framework"),
                    job: string_arg(run_matches, "job"),
                },
                jobs: run_matches.get_one::<usize>("jobs").copied(),
                project_dir: path_arg(run_matches, "project-dir"),
                work_dir: path_arg(run_matches, "work-dir"),
                html: run_matches.get_one::<PathBuf>("html").cloned(),
                no_submit: run_matches.get_flag("no-submit"),
                token: string_arg(run_matches, "token")
                    .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())),
                commit: string_arg(run_matches, "commit"),
                repository: string_arg(run_matches, "repository"),
                run_id: string_arg(run_matches, "run-id"),
            };
            commands::run::execute(options).await
        }
        Some(("init", init_matches)) => {
            commands::init::run_init_wizard(
                &path_arg(init_matches, "output"),
                init_matches.get_flag("non-interactive"),
                init_matches.get_flag("force"),
            )?;
            Ok(0)
        }
        _ => {
            build_cli().print_help()?;
            Ok(0)
        }
    }
}

/// Parses the command line, runs the subcommand and returns the exit code.
/// Configuration errors map to exit code 3, anything else unexpected to 4.
///
/// 解析命令行，执行子命令并返回退出码。配置错误映射为退出码 3，其他意外错误映射为 4。
pub async fn run() -> u8 {
    let matches = build_cli().get_matches();

    let format = match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };
    init_tracing(format, level_for_verbosity(matches.get_count("verbose")));

    match dispatch(&matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if e.downcast_ref::<ConfigurationError>().is_some() {
                EXIT_CONFIGURATION_ERROR
            } else {
                EXIT_INTERNAL_ERROR
            }
        }
    }
}
