//! # Test Runner Module / 测试运行模块
//!
//! Runs a job's test suite as independent groups on a bounded worker pool.
//! A group is one top-level directory of the suite and is always handled by a
//! single worker. Workers share nothing but the read-only environment: each
//! group writes its own coverage data file and returns its own
//! [`GroupResult`]. Results are combined only after every worker has joined.
//!
//! 在有界的工作者池上以独立分组的方式运行作业的测试套件。
//! 一个分组是测试套件中的一个顶层目录，并且总是由单个工作者处理。
//! 工作者之间只共享只读的环境：每个分组写入自己的覆盖率数据文件，并返回自己的
//! [`GroupResult`]。结果只在所有工作者结束后才合并。

use crate::core::config::{CoverageConfig, TestsConfig, WorkerCount};
use crate::core::coverage::{CoverageMerge, CoverageReport};
use crate::core::error::{ConfigurationError, EnvironmentError};
use crate::infra::command::{ExitState, Invocation, ProcessRunner};
use crate::infra::fs::clear_stale_artifacts;
use crate::infra::template::{self, TemplateVars};
use anyhow::{Context, Result};
use colored::*;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One partition of the suite: every member file under one top-level directory.
/// 测试套件的一个分区：一个顶层目录下的所有成员文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__"
}

/// Lists suite members: files with one of `extensions`, anywhere below an
/// immediate subdirectory of `root`. Files directly in `root` are support
/// modules and are not members. The result is sorted.
///
/// 列出测试套件成员：位于 `root` 的直接子目录之下、扩展名属于 `extensions` 的文件。
/// 直接位于 `root` 中的文件是辅助模块，不属于套件成员。结果已排序。
pub fn discover_suite(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }

    let mut pending = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("Failed to read test root: {}", root.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && !is_ignored(&entry.file_name().to_string_lossy()) {
            pending.push(entry.path());
        }
    }

    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if is_ignored(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext))
            {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Groups suite files by their top-level directory under `root`. Pure: the
/// groups are pairwise disjoint and together hold every file that lies in a
/// subdirectory of `root`. Groups are sorted by name.
///
/// 按 `root` 下的顶层目录对套件文件分组。纯函数：各分组两两不相交，
/// 合起来包含所有位于 `root` 子目录中的文件。分组按名称排序。
pub fn partition_suite(root: &Path, files: &[PathBuf]) -> Vec<TestGroup> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let Ok(relative) = file.strip_prefix(root) else {
            continue;
        };
        let mut components = relative.components();
        let (Some(top), Some(_)) = (components.next(), components.next()) else {
            continue;
        };
        groups
            .entry(top.as_os_str().to_string_lossy().into_owned())
            .or_default()
            .push(file.clone());
    }

    groups
        .into_iter()
        .map(|(name, mut files)| {
            files.sort();
            TestGroup {
                path: root.join(&name),
                name,
                files,
            }
        })
        .collect()
}

/// Keeps only the named groups. An empty selection keeps everything.
/// A name that matches no discovered group is a configuration error.
///
/// 只保留指定名称的分组。空选择保留全部分组。
/// 与任何已发现分组都不匹配的名称属于配置错误。
pub fn select_groups(groups: Vec<TestGroup>, names: &[String], root: &Path) -> Result<Vec<TestGroup>, ConfigurationError> {
    if let Some(unknown) = names.iter().find(|n| !groups.iter().any(|g| g.name == **n)) {
        return Err(ConfigurationError::UnknownTestGroup {
            name: unknown.clone(),
            root: root.display().to_string(),
        });
    }
    if names.is_empty() {
        return Ok(groups);
    }
    Ok(groups
        .into_iter()
        .filter(|g| names.iter().any(|n| *n == g.name))
        .collect())
}

/// Discovers, partitions and selects the suite under `project_dir`.
/// Run once before any job starts so a mistyped group name stops the whole matrix.
///
/// 发现、划分并选择 `project_dir` 下的测试套件。
/// 在任何作业开始之前运行一次，拼错的分组名会让整个矩阵停止。
pub fn selected_suite(project_dir: &Path, tests: &TestsConfig) -> Result<Vec<TestGroup>> {
    let suite_root = project_dir.join(&tests.root);
    let files = discover_suite(&suite_root, &tests.extensions)?;
    Ok(select_groups(partition_suite(&suite_root, &files), &tests.groups, &suite_root)?)
}

/// Number of workers for `groups` groups: never more than the groups, never
/// more than `max_workers`, never less than one.
///
/// `groups` 个分组所需的工作者数量：不超过分组数，不超过 `max_workers`，至少为 1。
pub fn resolve_workers(setting: WorkerCount, max_workers: usize, groups: usize) -> usize {
    let wanted = match setting {
        WorkerCount::Auto => num_cpus::get(),
        WorkerCount::Fixed(n) => n,
    };
    wanted.min(max_workers).min(groups).max(1)
}

/// Status of one test case, as printed in the pytest short summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    XFail,
    XPass,
}

impl CaseStatus {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "PASSED" => Some(CaseStatus::Passed),
            "FAILED" => Some(CaseStatus::Failed),
            "ERROR" => Some(CaseStatus::Error),
            "SKIPPED" => Some(CaseStatus::Skipped),
            "XFAIL" => Some(CaseStatus::XFail),
            "XPASS" => Some(CaseStatus::XPass),
            _ => None,
        }
    }

    /// Failed and errored cases fail the job.
    pub fn is_failure(self) -> bool {
        matches!(self, CaseStatus::Failed | CaseStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseOutcome {
    pub id: String,
    pub status: CaseStatus,
}

/// Parses the `-rA` short test summary. When the summary header is present
/// only the lines after it are read, so captured test output cannot be
/// mistaken for results.
///
/// 解析 `-rA` 的简短测试摘要。如果存在摘要标题，则只读取标题之后的行，
/// 这样被捕获的测试输出就不会被误认为结果。
pub fn parse_pytest_summary(output: &str) -> Vec<CaseOutcome> {
    let body = match output.find("short test summary info") {
        Some(at) => &output[at..],
        None => output,
    };

    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (word, rest) = line.split_once(' ')?;
            let status = CaseStatus::from_keyword(word)?;
            let mut rest = rest.trim();
            // `SKIPPED [2] tests/x.py:10: reason`
            if rest.starts_with('[') {
                rest = rest.split_once("] ").map_or(rest, |(_, after)| after);
            }
            let id = rest.split(" - ").next().unwrap_or(rest).trim();
            (!id.is_empty()).then(|| CaseOutcome {
                id: id.to_string(),
                status,
            })
        })
        .collect()
}

/// What one group produced.
/// 单个分组的执行结果。
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub name: String,
    pub state: ExitState,
    pub cases: Vec<CaseOutcome>,
    pub coverage: CoverageReport,
    pub output: String,
    pub duration: Duration,
}

impl GroupResult {
    pub fn failed(&self) -> bool {
        self.cases.iter().any(|c| c.status.is_failure())
    }

    pub fn failed_cases(&self) -> impl Iterator<Item = &CaseOutcome> {
        self.cases.iter().filter(|c| c.status.is_failure())
    }

    /// Marks a broken run with a synthetic error case when it left no failing
    /// case behind: a non-zero exit, a signal, or a timeout.
    fn flag_broken_run(&mut self) {
        let broken = self.state != ExitState::Exited(0);
        if broken && !self.failed() {
            self.cases.push(CaseOutcome {
                id: format!("{}::<session>", self.name),
                status: CaseStatus::Error,
            });
        }
    }
}

/// Results of every group of one job, sorted by group name.
#[derive(Debug, Clone, Default)]
pub struct TestRunResult {
    pub groups: Vec<GroupResult>,
    pub workers: usize,
}

impl TestRunResult {
    /// The job's tests fail iff any case in any group failed or errored.
    /// 当且仅当任意分组中有测试用例失败或出错时，作业的测试才算失败。
    pub fn failed(&self) -> bool {
        self.groups.iter().any(GroupResult::failed)
    }

    pub fn failed_case_count(&self) -> usize {
        self.groups.iter().map(|g| g.failed_cases().count()).sum()
    }

    pub fn failed_groups(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|g| g.failed())
            .map(|g| g.name.clone())
            .collect()
    }

    pub fn case_count(&self) -> usize {
        self.groups.iter().map(|g| g.cases.len()).sum()
    }

    /// Merges every group's coverage.
    pub fn coverage(&self) -> CoverageReport {
        let mut merge = CoverageMerge::new();
        for group in &self.groups {
            merge.add(&group.name, &group.coverage);
        }
        merge.finish()
    }
}

/// Runs the groups of one job.
pub struct TestRunner<'a> {
    pub tests: &'a TestsConfig,
    pub coverage: &'a CoverageConfig,
    pub runner: &'a dyn ProcessRunner,
}

impl TestRunner<'_> {
    /// Clears stale artifacts, discovers and partitions the suite, and runs
    /// every selected group to completion. Returns an error for filesystem
    /// problems, an unknown group selection, or a suite with no groups.
    ///
    /// 清理陈旧产物，发现并划分测试套件，然后将每个选中的分组运行完毕。
    /// 文件系统问题、未知的分组选择或没有任何分组的套件会返回错误。
    pub async fn run(&self, vars: &TemplateVars, project_dir: &Path, job_dir: &Path) -> Result<TestRunResult> {
        let suite_root = project_dir.join(&self.tests.root);
        let coverage_dir = job_dir.join("coverage");

        let removed = clear_stale_artifacts(&suite_root, &self.tests.clean, &[coverage_dir.clone()])?;
        tracing::debug!(count = removed.len(), "removed stale artifacts");
        fs::create_dir_all(&coverage_dir)
            .with_context(|| format!("Failed to create coverage directory: {}", coverage_dir.display()))?;

        let groups = selected_suite(project_dir, self.tests)?;
        if groups.is_empty() {
            println!("{}", format!("  -> no test groups found under {}", suite_root.display()).yellow());
            return Err(EnvironmentError::EmptySuite { root: suite_root }.into());
        }

        let workers = resolve_workers(self.tests.workers, self.tests.max_workers, groups.len());
        println!(
            "{}",
            format!("  -> running {} test groups on {} workers", groups.len(), workers).blue()
        );

        let pending: Vec<_> = groups
            .iter()
            .map(|group| self.run_group(group, vars, project_dir, &coverage_dir))
            .collect();
        let mut results: Vec<GroupResult> = stream::iter(pending)
            .buffer_unordered(workers)
            .collect()
            .await;
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(TestRunResult {
            groups: results,
            workers,
        })
    }

    async fn run_group(
        &self,
        group: &TestGroup,
        vars: &TemplateVars,
        project_dir: &Path,
        coverage_dir: &Path,
    ) -> GroupResult {
        let lcov_path = coverage_dir.join(format!("{}.lcov", group.name));
        let data_path = coverage_dir.join(format!(".coverage.{}", group.name));
        let group_path = group
            .path
            .strip_prefix(project_dir)
            .unwrap_or(&group.path)
            .to_string_lossy()
            .replace('\\', "/");

        let mut vars = vars.clone();
        vars.set("group", group.name.clone())
            .set("group_path", group_path)
            .set("cov_target", self.coverage.target.clone())
            .set("cov_config", self.coverage.config.clone())
            .set("coverage_file", lcov_path.display().to_string());

        let mut result = GroupResult {
            name: group.name.clone(),
            state: ExitState::Terminated,
            cases: Vec::new(),
            coverage: CoverageReport::new(),
            output: String::new(),
            duration: Duration::ZERO,
        };

        let invocation = match template::render_command(&self.tests.command, &vars) {
            Ok(argv) => Invocation::from_argv(&group.name, argv, project_dir.to_path_buf()),
            Err(e) => {
                result.output = format!("failed to render test command: {e}");
                None
            }
        };
        let Some(invocation) = invocation else {
            result.flag_broken_run();
            return result;
        };
        let ceiling = Some(Duration::from_secs(self.tests.timeout_secs)).filter(|d| !d.is_zero());
        let invocation = invocation
            .with_env("COVERAGE_FILE", data_path.display().to_string())
            .with_timeout(ceiling);

        tracing::info!(group = %group.name, files = group.files.len(), command = %invocation.command_line(), "running test group");
        match self.runner.run(&invocation).await {
            Ok(output) => {
                result.state = output.state;
                result.cases = parse_pytest_summary(&output.output);
                result.output = output.output;
                result.duration = output.duration;
            }
            Err(e) => {
                result.output = format!("failed to start `{}`: {e}", invocation.command_line());
            }
        }
        result.flag_broken_run();

        result.coverage = match CoverageReport::read_lcov(&lcov_path) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(group = %group.name, path = %lcov_path.display(), error = %e, "no coverage data for group");
                CoverageReport::new()
            }
        };

        let status = if result.failed() {
            "FAILED".red()
        } else {
            "passed".green()
        };
        println!(
            "     group {:<24} {} ({} cases, {:.2?})",
            group.name,
            status,
            result.cases.len(),
            result.duration
        );
        result
    }
}
