//! # Common Test Utilities / 通用测试工具
//!
//! Shared fixtures for the integration tests: a scripted process runner that
//! stands in for the operating system, a recording coverage sink, and
//! throwaway project directories with a grouped test suite.
//!
//! 集成测试共享的夹具：代替操作系统的脚本化进程运行器、记录型覆盖率接收端，
//! 以及带有分组测试套件的临时项目目录。

#![allow(dead_code)]

use async_trait::async_trait;
use matrix_orchestrator::config::PipelineConfig;
use matrix_orchestrator::core::error::ReportingError;
use matrix_orchestrator::core::matrix::Axis;
use matrix_orchestrator::infra::command::{ExitState, Invocation, ProcessOutput, ProcessRunner};
use matrix_orchestrator::reporting::submit::{CoverageSink, Submission, SubmitReceipt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// What the fake process prints and how it ends.
#[derive(Debug, Clone)]
pub struct Reply {
    pub state: ExitState,
    pub output: String,
    /// Written to the `--cov-report=lcov:<path>` target, if the command has one.
    pub lcov: Option<String>,
}

impl Reply {
    pub fn ok(output: &str) -> Self {
        Self {
            state: ExitState::Exited(0),
            output: output.to_string(),
            lcov: None,
        }
    }

    pub fn exit(code: i32, output: &str) -> Self {
        Self {
            state: ExitState::Exited(code),
            output: output.to_string(),
            lcov: None,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            state: ExitState::TimedOut,
            output: String::new(),
            lcov: None,
        }
    }

    pub fn with_lcov(mut self, lcov: &str) -> Self {
        self.lcov = Some(lcov.to_string());
        self
    }
}

struct Rule {
    label: String,
    needle: Option<String>,
    reply: Reply,
}

/// A [`ProcessRunner`] that never spawns anything. Invocations are recorded
/// and answered by the first rule whose label (and optional command-line
/// substring) matches. Unmatched invocations succeed with no output.
///
/// 一个从不派生进程的 [`ProcessRunner`]。调用会被记录，并由第一个标签
/// （以及可选的命令行子串）匹配的规则应答。未匹配的调用以空输出成功。
#[derive(Default)]
pub struct FakeRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, label: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            label: label.to_string(),
            needle: None,
            reply,
        });
        self
    }

    pub fn on_matching(mut self, label: &str, needle: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            label: label.to_string(),
            needle: Some(needle.to_string()),
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.label).collect()
    }

    pub fn calls_labelled(&self, label: &str) -> Vec<Invocation> {
        self.calls().into_iter().filter(|c| c.label == label).collect()
    }
}

fn lcov_target(invocation: &Invocation) -> Option<PathBuf> {
    invocation
        .args
        .iter()
        .find_map(|a| a.strip_prefix("--cov-report=lcov:"))
        .map(PathBuf::from)
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        let command_line = invocation.command_line();
        let reply = self
            .rules
            .iter()
            .find(|rule| {
                rule.label == invocation.label
                    && rule.needle.as_deref().is_none_or(|n| command_line.contains(n))
            })
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| Reply::ok(""));

        if let (Some(lcov), Some(path)) = (&reply.lcov, lcov_target(invocation)) {
            let path = if path.is_relative() {
                invocation.cwd.join(path)
            } else {
                path
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, lcov)?;
        }

        Ok(ProcessOutput {
            state: reply.state,
            output: reply.output,
            duration: Duration::from_millis(5),
        })
    }
}

/// A [`CoverageSink`] that keeps every submission. The first `failures`
/// attempts are rejected with a 503.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<Submission>>,
    failures: usize,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Submission> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoverageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, ReportingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ReportingError::Rejected {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        self.received.lock().unwrap().push(submission.clone());
        Ok(SubmitReceipt {
            location: format!("memory://{}", submission.job.slug()),
        })
    }
}

/// Creates a project with `tests/<group>/test_<group>.py` for every group,
/// a root-level `conftest.py`, and a stale `__pycache__`.
///
/// 创建一个项目：每个分组一个 `tests/<group>/test_<group>.py`，
/// 根目录下一个 `conftest.py`，以及一个陈旧的 `__pycache__`。
pub fn python_project(groups: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let tests = dir.path().join("tests");
    fs::create_dir_all(&tests).unwrap();
    fs::write(tests.join("conftest.py"), "import pytest\n").unwrap();
    fs::write(tests.join("__init__.py"), "").unwrap();
    for group in groups {
        let group_dir = tests.join(group);
        fs::create_dir_all(group_dir.join("__pycache__")).unwrap();
        fs::write(group_dir.join("__pycache__").join("stale.pyc"), "").unwrap();
        fs::write(
            group_dir.join(format!("test_{group}.py")),
            "def test_ok():\n    assert True\n",
        )
        .unwrap();
    }
    fs::write(
        dir.path().join("pyproject.toml"),
        "[project]\nname = \"demo-package\"\n",
    )
    .unwrap();
    dir
}

/// The default pipeline narrowed to one job: ubuntu-latest / 3.10 / 1.13.1.
pub fn single_job_config() -> PipelineConfig {
    let mut config = PipelineConfig::example();
    config.matrix.axes = vec![
        Axis::new("os", &["ubuntu-latest"]),
        Axis::new("runtime", &["3.10"]),
        Axis::new("framework", &["1.13.1"]),
    ];
    config.overrides.clear();
    config
}

/// Writes `config` as TOML to `<dir>/Pipeline.toml` and returns the path.
pub fn write_pipeline(dir: &Path, config: &PipelineConfig) -> PathBuf {
    let path = dir.join("Pipeline.toml");
    fs::write(&path, toml::to_string_pretty(config).unwrap()).unwrap();
    path
}

/// Writes raw TOML to `<dir>/Pipeline.toml` and returns the path.
pub fn write_pipeline_text(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("Pipeline.toml");
    fs::write(&path, text).unwrap();
    path
}

/// A pytest short summary block, as printed with `-rA`.
pub fn pytest_summary(lines: &[&str]) -> String {
    let mut out = String::from(
        "collected 3 items\n\nsome captured output FAILED not a result\n\
         =========================== short test summary info ============================\n",
    );
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("========================= 1 failed, 2 passed in 0.12s ==========================\n");
    out
}
