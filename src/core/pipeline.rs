//! # Pipeline Module / 流水线模块
//!
//! Drives jobs from the trigger check to coverage submission:
//! trigger gate, matrix, version resolution, install, tests, coverage merge,
//! report submission. Jobs are independent. One job failing never stops the
//! others; only cancellation does.
//!
//! 驱动作业从触发检查一直到覆盖率提交：触发门禁、矩阵、版本解析、安装、测试、
//! 覆盖率合并、报告提交。作业相互独立。一个作业失败永远不会停止其他作业；只有取消才会。

use crate::core::config::ValidatedPipeline;
use crate::core::coverage::CoverageSummary;
use crate::core::error::{ConfigurationError, EnvironmentError};
use crate::core::installer::{Installer, LayerRecord};
use crate::core::models::{JobOutcome, ResolvedJob};
use crate::core::runner::{TestRunResult, TestRunner};
use crate::core::trigger::{CommitContext, TriggerEvent};
use crate::infra::command::ProcessRunner;
use crate::infra::fs;
use crate::infra::retry::RetryPolicy;
use crate::reporting::submit::{CoverageSink, Submission, SubmissionStatus, submit_with_retry};
use chrono::{DateTime, Utc};
use colored::*;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What the trigger gate decided.
/// 触发门禁的决定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The event is not allow-listed. No job is created.
    Skipped,
    Jobs(Vec<ResolvedJob>),
}

impl Plan {
    pub fn jobs(&self) -> &[ResolvedJob] {
        match self {
            Plan::Skipped => &[],
            Plan::Jobs(jobs) => jobs,
        }
    }
}

/// Checks the trigger, then expands and resolves the matrix.
/// 检查触发条件，然后展开并解析矩阵。
pub fn plan(pipeline: &ValidatedPipeline, event: &TriggerEvent) -> Plan {
    if !pipeline.config.trigger.allows(event) {
        tracing::info!(event = %event, "trigger is not allow-listed, skipping the matrix");
        return Plan::Skipped;
    }
    Plan::Jobs(pipeline.resolver.resolve_all(pipeline.matrix.jobs()))
}

/// Narrows a plan to the jobs requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSelection {
    pub os: Option<String>,
    pub runtime: Option<String>,
    pub framework: Option<String>,
    /// A job number or slug.
    pub job: Option<String>,
}

impl JobSelection {
    pub fn is_empty(&self) -> bool {
        self.os.is_none() && self.runtime.is_none() && self.framework.is_none() && self.job.is_none()
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = [
            ("os", &self.os),
            ("runtime", &self.runtime),
            ("framework", &self.framework),
            ("job", &self.job),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
        .collect();
        parts.join(", ")
    }

    fn matches(&self, job: &ResolvedJob) -> bool {
        let holds = |wanted: &Option<String>, actual: &str| wanted.as_deref().is_none_or(|w| w == actual);
        holds(&self.os, &job.spec.os)
            && holds(&self.runtime, &job.spec.runtime_version)
            && holds(&self.framework, &job.spec.framework_version)
            && self
                .job
                .as_deref()
                .is_none_or(|wanted| wanted == job.spec.number.to_string() || wanted == job.slug())
    }

    /// Filters `jobs`. Selecting nothing out of a non-empty plan is a configuration error.
    pub fn apply(&self, jobs: Vec<ResolvedJob>) -> Result<Vec<ResolvedJob>, ConfigurationError> {
        if self.is_empty() || jobs.is_empty() {
            return Ok(jobs);
        }
        let selected: Vec<ResolvedJob> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        if selected.is_empty() {
            return Err(ConfigurationError::NoJobSelected(self.describe()));
        }
        Ok(selected)
    }
}

/// Everything recorded about one job.
/// 关于一个作业记录的全部信息。
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: ResolvedJob,
    pub outcome: JobOutcome,
    pub install: Vec<LayerRecord>,
    pub install_error: Option<EnvironmentError>,
    pub tests: Option<TestRunResult>,
    pub coverage: Option<CoverageSummary>,
    pub coverage_path: Option<PathBuf>,
    pub inspection: Option<PathBuf>,
    /// `None` when the job never reached submission.
    pub submission: Option<SubmissionStatus>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl JobReport {
    fn new(job: ResolvedJob, outcome: JobOutcome) -> Self {
        Self {
            job,
            outcome,
            install: Vec::new(),
            install_error: None,
            tests: None,
            coverage: None,
            coverage_path: None,
            inspection: None,
            submission: None,
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    pub fn cancelled(job: ResolvedJob) -> Self {
        Self::new(job, JobOutcome::Cancelled)
    }
}

/// Runs resolved jobs against one project.
/// 针对一个项目运行已解析的作业。
pub struct Pipeline {
    pub validated: Arc<ValidatedPipeline>,
    pub runner: Arc<dyn ProcessRunner>,
    pub sink: Option<Arc<dyn CoverageSink>>,
    pub project_dir: PathBuf,
    pub work_dir: PathBuf,
    pub event: TriggerEvent,
    pub commit: CommitContext,
}

impl Pipeline {
    pub fn retry_policy(&self) -> RetryPolicy {
        let report = &self.validated.config.report;
        RetryPolicy::exponential(report.attempts as usize, Duration::from_millis(report.backoff_ms))
    }

    /// Runs one job end to end. Failures are recorded on the report, never returned.
    /// 端到端地运行一个作业。失败被记录在报告中，从不作为错误返回。
    pub async fn run_job(&self, job: ResolvedJob) -> JobReport {
        let start = Instant::now();
        let mut report = JobReport::new(job.clone(), JobOutcome::Passed);
        let config = &self.validated.config;
        let slug = job.slug();

        println!("\n{}", format!("Job {}", job.spec).bold().cyan());
        if let Some(applied) = &job.applied {
            println!(
                "{}",
                format!(
                    "  -> runtime {} replaced by {} ({})",
                    job.spec.runtime_version,
                    job.effective_runtime,
                    applied.reason.as_deref().unwrap_or("override rule")
                )
                .yellow()
            );
        }

        let job_dir = match fs::job_dir(&self.work_dir, &slug) {
            Ok(dir) => dir,
            Err(e) => {
                report.outcome = JobOutcome::EnvironmentFailure {
                    stage: "workspace".to_string(),
                    message: format!("{e:#}"),
                };
                report.duration = start.elapsed();
                return report;
            }
        };

        let installer = Installer {
            environment: &config.environment,
            install: &config.install,
            graph: &self.validated.graph,
            runner: self.runner.as_ref(),
        };
        let installed = installer.install(&job, &self.project_dir, &job_dir).await;
        report.install = installed.records;
        let environment = match installed.outcome {
            Ok(environment) => environment,
            Err(error) => {
                println!("{}", format!("  -> {error}").red());
                report.outcome = JobOutcome::EnvironmentFailure {
                    stage: error.stage().to_string(),
                    message: error.to_string(),
                };
                report.install_error = Some(error);
                report.duration = start.elapsed();
                return report;
            }
        };
        report.inspection = environment.inspection.clone();

        let vars = match installer.layer_vars(&job, &self.project_dir, environment.env_dir.as_deref(), &environment.python) {
            Ok(vars) => vars,
            Err(error) => {
                report.outcome = JobOutcome::EnvironmentFailure {
                    stage: error.stage().to_string(),
                    message: error.to_string(),
                };
                report.install_error = Some(error);
                report.duration = start.elapsed();
                return report;
            }
        };

        let test_runner = TestRunner {
            tests: &config.tests,
            coverage: &config.coverage,
            runner: self.runner.as_ref(),
        };
        let results = match test_runner.run(&vars, &self.project_dir, &job_dir).await {
            Ok(results) => results,
            Err(e) => {
                let stage = match e.downcast_ref::<EnvironmentError>() {
                    Some(error) => error.stage(),
                    None if e.downcast_ref::<ConfigurationError>().is_some() => "tests",
                    None => "workspace",
                };
                println!("{}", format!("  -> {e:#}").red());
                report.outcome = JobOutcome::EnvironmentFailure {
                    stage: stage.to_string(),
                    message: format!("{e:#}"),
                };
                report.duration = start.elapsed();
                return report;
            }
        };

        let coverage = results.coverage();
        let coverage_path = job_dir.join(&config.coverage.output);
        match coverage.write_lcov(&coverage_path, &slug) {
            Ok(()) => report.coverage_path = Some(coverage_path),
            Err(e) => {
                tracing::warn!(job = %slug, path = %coverage_path.display(), error = %e, "failed to write merged coverage");
            }
        }
        report.coverage = Some(coverage.summary());

        report.outcome = if results.failed() {
            JobOutcome::TestFailure {
                failed_cases: results.failed_case_count(),
                failed_groups: results.failed_groups(),
            }
        } else {
            JobOutcome::Passed
        };
        report.tests = Some(results);

        report.submission = Some(match &self.sink {
            Some(sink) => {
                let submission = Submission {
                    job: job.clone(),
                    event: self.event.clone(),
                    commit: self.commit.clone(),
                    coverage,
                    service_name: config.report.service_name.clone(),
                    parallel: config.report.parallel,
                    run_at: Utc::now(),
                };
                submit_with_retry(sink.as_ref(), &submission, &self.retry_policy()).await
            }
            None => SubmissionStatus::Disabled,
        });

        report.duration = start.elapsed();
        report
    }

    /// Runs every job, at most `concurrency` at a time, without fail-fast.
    /// Jobs still running when `stop` fires are reported as cancelled.
    /// Reports come back in job-number order.
    ///
    /// 运行所有作业，同时最多 `concurrency` 个，不启用快速失败。
    /// `stop` 触发时仍在运行的作业被报告为已取消。报告按作业编号顺序返回。
    pub async fn run_all(
        self: Arc<Self>,
        jobs: Vec<ResolvedJob>,
        concurrency: usize,
        stop: CancellationToken,
    ) -> Vec<JobReport> {
        let mut reports: Vec<JobReport> = stream::iter(jobs.into_iter().map(|job| {
            let pipeline = Arc::clone(&self);
            let stop = stop.clone();
            async move {
                if stop.is_cancelled() {
                    return JobReport::cancelled(job);
                }
                let worker_job = job.clone();
                let mut handle = tokio::spawn(async move { pipeline.run_job(worker_job).await });
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        handle.abort();
                        JobReport::cancelled(job)
                    }
                    joined = &mut handle => match joined {
                        Ok(report) => report,
                        Err(e) => {
                            tracing::error!(job = %job.slug(), error = %e, "job task failed");
                            JobReport::new(job, JobOutcome::EnvironmentFailure {
                                stage: "internal".to_string(),
                                message: e.to_string(),
                            })
                        }
                    },
                }
            }
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

        reports.sort_by_key(|r| r.job.spec.number);
        reports
    }
}
