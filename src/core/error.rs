//! # Error Taxonomy Module / 错误分类模块
//!
//! Typed errors for each failure domain of the pipeline. Configuration errors
//! surface before any job starts, environment errors are fatal to a single
//! job, and reporting errors never change a job's status.
//!
//! 流水线各个失败域的类型化错误。配置错误在任何作业开始前暴露，
//! 环境错误只对单个作业致命，报告错误永远不会改变作业状态。

use std::path::PathBuf;
use thiserror::Error;

/// Errors in the declared pipeline: matrix, overrides, install graph, templates.
/// 声明的流水线中的错误：矩阵、覆盖规则、安装图、命令模板。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("failed to read pipeline config {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to parse pipeline config: {0}")]
    Parse(String),

    #[error("the matrix declares no axes")]
    EmptyMatrix,

    #[error("axis '{0}' declares no values, the matrix would expand to zero jobs")]
    EmptyAxis(String),

    #[error("axis '{0}' is declared more than once")]
    DuplicateAxis(String),

    #[error("axis '{axis}' lists value '{value}' more than once")]
    DuplicateAxisValue { axis: String, value: String },

    #[error("required axis '{0}' is missing from the matrix")]
    MissingAxis(&'static str),

    #[error("unknown axis '{0}' (expected os, runtime or framework)")]
    UnknownAxis(String),

    #[error("exclude entry #{index} names {axis} = '{value}', which the matrix does not declare")]
    UnknownExcludeTarget {
        index: usize,
        axis: String,
        value: String,
    },

    #[error("matrix excludes remove every job")]
    EverythingExcluded,

    #[error("jobs #{first} and #{second} share the directory name '{slug}', rename one of the axis values")]
    DuplicateJobSlug { slug: String, first: usize, second: usize },

    #[error("override rule #{0} has no condition and would match every job")]
    EmptyOverridePredicate(usize),

    #[error("override rule #{index} targets {axis} = '{value}', which the matrix does not declare")]
    UnknownOverrideTarget {
        index: usize,
        axis: &'static str,
        value: String,
    },

    #[error("install layer '{0}' is declared more than once")]
    DuplicateLayer(String),

    #[error("install layer '{layer}' requires unknown layer '{missing}'")]
    UnknownLayer { layer: String, missing: String },

    #[error("install layers form a cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("install layer '{layer}' compiles against '{against}' but does not depend on '{missing}'")]
    NativeWithoutDependency {
        layer: String,
        against: String,
        missing: String,
    },

    #[error("install layer '{0}' has no commands")]
    EmptyLayer(String),

    #[error("template '{template}' uses unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("invalid command template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("no job matches the selection {0}")]
    NoJobSelected(String),

    #[error("tests.groups names '{name}', which is not a test directory under {root}")]
    UnknownTestGroup { name: String, root: String },
}

/// A failure while preparing a job's isolated environment.
/// 准备作业隔离环境时的失败。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("failed to provision environment at {path}: {message}")]
    Provision { path: PathBuf, message: String },

    #[error("layer '{layer}' command `{command}` exited with {exit}")]
    LayerFailed {
        layer: String,
        command: String,
        exit: String,
        output: String,
    },

    #[error("layer '{layer}' exceeded its {secs}s ceiling")]
    Timeout { layer: String, secs: u64 },

    #[error("layer '{layer}' could not start `{command}`: {message}")]
    Spawn {
        layer: String,
        command: String,
        message: String,
    },

    #[error("smoke check '{layer}' expected version {expected}, the library reported '{reported}'")]
    SmokeCheck {
        layer: String,
        expected: String,
        reported: String,
    },

    #[error("layer '{layer}' has no compatibility entry for framework version {framework}")]
    MissingCompat { layer: String, framework: String },

    #[error("layer '{layer}' started before its prerequisites completed: {}", .missing.join(", "))]
    PreconditionViolation { layer: String, missing: Vec<String> },

    #[error("failed to render command for layer '{layer}': {message}")]
    Template { layer: String, message: String },

    #[error("no test files found under {root}")]
    EmptySuite { root: PathBuf },
}

impl EnvironmentError {
    /// The install stage (layer name, or `environment`) that reported the failure.
    pub fn stage(&self) -> &str {
        match self {
            EnvironmentError::Provision { .. } => "environment",
            EnvironmentError::LayerFailed { layer, .. }
            | EnvironmentError::Timeout { layer, .. }
            | EnvironmentError::Spawn { layer, .. }
            | EnvironmentError::SmokeCheck { layer, .. }
            | EnvironmentError::MissingCompat { layer, .. }
            | EnvironmentError::PreconditionViolation { layer, .. }
            | EnvironmentError::Template { layer, .. } => layer,
            EnvironmentError::EmptySuite { .. } => "tests",
        }
    }

    /// Captured command output attached to the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            EnvironmentError::LayerFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A failure to deliver a coverage report. Never escalates to job failure.
/// 覆盖率报告投递失败。永远不会升级为作业失败。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportingError {
    #[error("no credentials configured for {0}")]
    MissingCredentials(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service rejected the report with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to write report payload: {0}")]
    Io(String),

    #[error("failed to encode report payload: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for ReportingError {
    fn from(err: reqwest::Error) -> Self {
        ReportingError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for ReportingError {
    fn from(err: std::io::Error) -> Self {
        ReportingError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ReportingError {
    fn from(err: serde_json::Error) -> Self {
        ReportingError::Encode(err.to_string())
    }
}

/// Errors produced while reading per-group coverage data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoverageError {
    #[error("line {line}: DA record outside of an SF block")]
    RecordOutsideFile { line: usize },

    #[error("line {line}: malformed DA record '{record}'")]
    MalformedRecord { line: usize, record: String },
}
