//! # Run Command Module / 运行命令模块
//!
//! Implements the `run` command: gate on the trigger, select jobs, run them
//! concurrently without fail-fast, print the summary and fold the outcomes
//! into the exit code.
//!
//! 实现 `run` 命令：按触发条件门禁、选择作业、在不启用快速失败的情况下并发运行，
//! 打印摘要，并将结果折叠为退出码。

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::cli::TriggerArgs;
use crate::cli::commands::{load_validated, trigger_event};
use crate::core::config::{ReportConfig, ReportService};
use crate::core::models::{EXIT_SUCCESS, aggregate_exit_code};
use crate::core::pipeline::{self, JobSelection, Pipeline, Plan};
use crate::core::runner;
use crate::core::trigger::CommitContext;
use crate::infra::command::SystemRunner;
use crate::reporting::{
    console::{print_failure_details, print_summary},
    html::generate_html_report,
    submit::{CoverageSink, CoverallsSink, FileSink},
};

/// Options of the run command.
pub struct RunOptions {
    pub config: PathBuf,
    pub trigger: TriggerArgs,
    pub selection: JobSelection,
    pub jobs: Option<usize>,
    pub project_dir: PathBuf,
    pub work_dir: PathBuf,
    pub html: Option<PathBuf>,
    pub no_submit: bool,
    pub token: Option<String>,
    pub commit: Option<String>,
    pub repository: Option<String>,
    pub run_id: Option<String>,
}

/// Builds the coverage sink for `[report]`. `None` disables submission.
/// 根据 `[report]` 构建覆盖率接收端。`None` 表示禁用提交。
pub fn sink_for(report: &ReportConfig, work_dir: &std::path::Path, token: Option<String>) -> Option<Arc<dyn CoverageSink>> {
    match report.service {
        ReportService::Coveralls => Some(Arc::new(CoverallsSink::new(report.endpoint.clone(), token))),
        ReportService::File => Some(Arc::new(FileSink {
            work_dir: work_dir.to_path_buf(),
            file_name: report.file.clone(),
        })),
        ReportService::None => None,
    }
}

/// Executes the run command and returns the process exit code.
/// 执行运行命令并返回进程退出码。
pub async fn execute(options: RunOptions) -> Result<u8> {
    let validated = Arc::new(load_validated(&options.config)?);
    let event = trigger_event(options.trigger)?;
    println!("{} {}", "Trigger:".bold(), event);

    let jobs = match pipeline::plan(&validated, &event) {
        Plan::Skipped => {
            println!(
                "{}",
                "Trigger is not allow-listed, skipping the matrix (0 jobs).".yellow()
            );
            return Ok(EXIT_SUCCESS);
        }
        Plan::Jobs(jobs) => options.selection.apply(jobs)?,
    };

    let project_dir = fs::canonicalize(&options.project_dir)
        .with_context(|| format!("Project directory not found: {}", options.project_dir.display()))?;
    fs::create_dir_all(&options.work_dir)
        .with_context(|| format!("Failed to create work directory: {}", options.work_dir.display()))?;
    let work_dir = fs::canonicalize(&options.work_dir)
        .with_context(|| format!("Failed to resolve work directory: {}", options.work_dir.display()))?;

    runner::selected_suite(&project_dir, &validated.config.tests)?;

    println!("Project root: {}", project_dir.display());
    println!("Work directory: {}", work_dir.display());
    println!("{}", format!("Running {} jobs", jobs.len()).bold());

    let sink = if options.no_submit {
        None
    } else {
        sink_for(&validated.config.report, &work_dir, options.token)
    };
    let commit = CommitContext::from_platform(&event, options.commit, options.repository, options.run_id);

    let pipeline = Arc::new(Pipeline {
        validated: Arc::clone(&validated),
        runner: Arc::new(SystemRunner),
        sink,
        project_dir,
        work_dir,
        event,
        commit,
    });

    let stop = setup_signal_handler();
    let concurrency = options.jobs.unwrap_or(num_cpus::get() / 2 + 1);
    let reports = pipeline.run_all(jobs, concurrency, stop).await;

    print_summary(&reports);

    if let Some(report_path) = &options.html {
        println!("\nGenerating HTML report at: {}", report_path.display());
        if let Err(e) = generate_html_report(&reports, report_path) {
            eprintln!("{} {:#}", "Failed to generate HTML report:".red(), e);
        }
    }

    let code = aggregate_exit_code(reports.iter().map(|r| &r.outcome));
    if code == EXIT_SUCCESS {
        println!("\n{}", "All jobs passed.".green().bold());
    } else {
        print_failure_details(&reports);
    }
    Ok(code)
}

/// Cancels the returned token on Ctrl-C.
fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                println!("\n{}", "Interrupt received, cancelling unfinished jobs...".yellow());
                token_clone.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    token
}
