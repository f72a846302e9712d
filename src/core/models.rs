//! # Data Models Module / 数据模型模块
//!
//! Core data structures shared across the pipeline: job identities,
//! resolved jobs, job outcomes and the exit-code contract.
//!
//! 整个流水线共享的核心数据结构：作业标识、解析后的作业、作业结果以及退出码约定。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process exit code when every selected job passed (or the pipeline was skipped).
pub const EXIT_SUCCESS: u8 = 0;
/// At least one test case failed or errored.
pub const EXIT_TEST_FAILURE: u8 = 1;
/// An install layer or environment provisioning failed.
pub const EXIT_ENVIRONMENT_FAILURE: u8 = 2;
/// The pipeline declaration is invalid.
pub const EXIT_CONFIGURATION_ERROR: u8 = 3;
/// An unexpected internal error (I/O on the work directory, etc.).
pub const EXIT_INTERNAL_ERROR: u8 = 4;
/// The run was interrupted before every job finished.
pub const EXIT_CANCELLED: u8 = 130;

/// One point of the matrix. Unique within a run.
/// 矩阵中的一个点。在一次运行中唯一。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobSpec {
    /// 1-based position in expansion order. Stable across runs.
    /// 展开顺序中的位置（从 1 开始）。在多次运行之间保持稳定。
    pub number: usize,
    pub os: String,
    pub runtime_version: String,
    pub framework_version: String,
}

impl JobSpec {
    pub fn new(
        number: usize,
        os: impl Into<String>,
        runtime_version: impl Into<String>,
        framework_version: impl Into<String>,
    ) -> Self {
        Self {
            number,
            os: os.into(),
            runtime_version: runtime_version.into(),
            framework_version: framework_version.into(),
        }
    }

    /// Filesystem-safe identity of the job, e.g. `ubuntu-latest-3.10-1.13.1`.
    /// Also used as the coverage flag that distinguishes jobs at the tracking service.
    ///
    /// 作业的文件系统安全标识，例如 `ubuntu-latest-3.10-1.13.1`。
    /// 同时用作在覆盖率服务中区分作业的标记。
    pub fn slug(&self) -> String {
        format!("{}-{}-{}", self.os, self.runtime_version, self.framework_version)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// The matrix coordinates without the job number.
    pub fn coordinates(&self) -> (&str, &str, &str) {
        (&self.os, &self.runtime_version, &self.framework_version)
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} / runtime {} / framework {}",
            self.number, self.os, self.runtime_version, self.framework_version
        )
    }
}

/// Which override rule produced a job's effective runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOverride {
    /// 0-based index into the declared rule list.
    pub rule: usize,
    pub reason: Option<String>,
}

/// A job after version resolution.
/// 版本解析之后的作业。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJob {
    pub spec: JobSpec,
    /// Equals `spec.runtime_version` unless `applied` is set.
    /// 除非 `applied` 有值，否则等于 `spec.runtime_version`。
    pub effective_runtime: String,
    pub applied: Option<AppliedOverride>,
}

impl ResolvedJob {
    /// The runtime truncated to `major.minor`, used to pick an interpreter binary.
    pub fn runtime_minor(&self) -> String {
        self.effective_runtime
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn slug(&self) -> String {
        self.spec.slug()
    }
}

/// Final status of one job.
/// 单个作业的最终状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Passed,
    /// One or more test cases failed or errored. All groups still ran.
    TestFailure {
        failed_cases: usize,
        failed_groups: Vec<String>,
    },
    /// Provisioning or an install layer failed. Tests never ran.
    EnvironmentFailure { stage: String, message: String },
    /// Interrupted before completion.
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Passed)
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            JobOutcome::Passed => EXIT_SUCCESS,
            JobOutcome::TestFailure { .. } => EXIT_TEST_FAILURE,
            JobOutcome::EnvironmentFailure { .. } => EXIT_ENVIRONMENT_FAILURE,
            JobOutcome::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Label for summaries.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Passed => "Passed",
            JobOutcome::TestFailure { .. } => "Test Failure",
            JobOutcome::EnvironmentFailure { .. } => "Environment Failure",
            JobOutcome::Cancelled => "Cancelled",
        }
    }

    /// The stage that reported the failure, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            JobOutcome::Passed | JobOutcome::Cancelled => None,
            JobOutcome::TestFailure { .. } => Some("tests"),
            JobOutcome::EnvironmentFailure { stage, .. } => Some(stage),
        }
    }
}

/// Folds job outcomes into one process exit code.
/// Cancellation dominates, then environment failures, then test failures.
///
/// 将多个作业结果折叠为一个进程退出码。
/// 取消优先，其次是环境失败，最后是测试失败。
pub fn aggregate_exit_code<'a>(outcomes: impl IntoIterator<Item = &'a JobOutcome>) -> u8 {
    let rank = |code: u8| match code {
        EXIT_CANCELLED => 3,
        EXIT_ENVIRONMENT_FAILURE => 2,
        EXIT_TEST_FAILURE => 1,
        _ => 0,
    };
    outcomes
        .into_iter()
        .map(JobOutcome::exit_code)
        .max_by_key(|code| rank(*code))
        .unwrap_or(EXIT_SUCCESS)
}
