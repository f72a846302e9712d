//! # Trigger Module / 触发器模块
//!
//! The event that started the run and the branch allow-list that decides
//! whether the matrix runs at all. The check happens before any job is
//! created, so a rejected trigger costs nothing.
//!
//! 启动本次运行的事件，以及决定矩阵是否运行的分支允许列表。
//! 检查在创建任何作业之前进行，因此被拒绝的触发几乎没有开销。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of event reported by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            other => Err(format!("unsupported event kind '{other}'")),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => f.write_str("push"),
            EventKind::PullRequest => f.write_str("pull_request"),
        }
    }
}

/// The triggering event. Created once per invocation, never mutated.
/// 触发事件。每次调用创建一次，之后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub source_branch: String,
    /// The branch a pull request targets. `None` for pushes.
    /// 拉取请求的目标分支。推送事件为 `None`。
    pub target_branch: Option<String>,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            source_branch: branch.into(),
            target_branch: None,
        }
    }

    pub fn pull_request(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PullRequest,
            source_branch: source.into(),
            target_branch: Some(target.into()),
        }
    }

    /// Builds the event from GitHub Actions variables. Explicit values win over the environment.
    ///
    /// 从 GitHub Actions 环境变量构建事件。显式传入的值优先于环境变量。
    pub fn from_platform(
        kind: Option<EventKind>,
        source: Option<String>,
        target: Option<String>,
    ) -> Result<Self, String> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let kind = match kind {
            Some(kind) => kind,
            None => env("GITHUB_EVENT_NAME")
                .ok_or_else(|| "no event given and GITHUB_EVENT_NAME is not set".to_string())?
                .parse()?,
        };

        let source = source
            .or_else(|| env("GITHUB_HEAD_REF"))
            .or_else(|| env("GITHUB_REF_NAME"));

        match kind {
            EventKind::Push => {
                let source = source.ok_or_else(|| {
                    "push events need a source branch (--source-branch or GITHUB_REF_NAME)".to_string()
                })?;
                Ok(Self::push(source))
            }
            // The pull-request gate reads only the target, so the head ref is optional.
            EventKind::PullRequest => {
                let target = target.or_else(|| env("GITHUB_BASE_REF")).ok_or_else(|| {
                    "pull_request events need a target branch (--target-branch or GITHUB_BASE_REF)"
                        .to_string()
                })?;
                Ok(Self::pull_request(source.unwrap_or_default(), target))
            }
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_branch {
            Some(target) if self.source_branch.is_empty() => write!(f, "{} -> {}", self.kind, target),
            Some(target) => write!(f, "{} {} -> {}", self.kind, self.source_branch, target),
            None => write!(f, "{} {}", self.kind, self.source_branch),
        }
    }
}

/// Branch allow-list, declared in the `[trigger]` table.
/// 分支允许列表，在 `[trigger]` 表中声明。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    /// Branches whose pushes run the matrix.
    #[serde(default = "default_push_branches")]
    pub push_branches: Vec<String>,
    /// Target branches whose pull requests run the matrix.
    #[serde(default = "default_pull_request_targets")]
    pub pull_request_targets: Vec<String>,
}

fn default_push_branches() -> Vec<String> {
    vec!["main".into(), "dev".into(), "temp_test_branch".into()]
}

fn default_pull_request_targets() -> Vec<String> {
    vec!["dev".into()]
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            push_branches: default_push_branches(),
            pull_request_targets: default_pull_request_targets(),
        }
    }
}

impl TriggerPolicy {
    /// Whether the event should run the matrix.
    /// 该事件是否应该运行矩阵。
    pub fn allows(&self, event: &TriggerEvent) -> bool {
        match event.kind {
            EventKind::Push => self.push_branches.iter().any(|b| *b == event.source_branch),
            EventKind::PullRequest => event
                .target_branch
                .as_ref()
                .is_some_and(|target| self.pull_request_targets.iter().any(|b| b == target)),
        }
    }
}

/// Commit metadata attached to coverage submissions.
/// 附加在覆盖率提交中的提交元数据。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitContext {
    pub sha: Option<String>,
    pub branch: String,
    pub repository: Option<String>,
    /// Workflow run identifier, used as the service job id.
    pub run_id: Option<String>,
    pub pull_request: Option<u64>,
}

impl CommitContext {
    /// Fills unset values from `GITHUB_SHA`, `GITHUB_REPOSITORY`, `GITHUB_RUN_ID`
    /// and the pull request number encoded in `GITHUB_REF`.
    ///
    /// 未设置的值从 `GITHUB_SHA`、`GITHUB_REPOSITORY`、`GITHUB_RUN_ID`
    /// 以及 `GITHUB_REF` 中编码的拉取请求编号补全。
    pub fn from_platform(
        event: &TriggerEvent,
        sha: Option<String>,
        repository: Option<String>,
        run_id: Option<String>,
    ) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let pull_request = match event.kind {
            EventKind::PullRequest => env("GITHUB_REF").as_deref().and_then(pull_request_number),
            EventKind::Push => None,
        };
        Self {
            sha: sha.or_else(|| env("GITHUB_SHA")),
            branch: event.source_branch.clone(),
            repository: repository.or_else(|| env("GITHUB_REPOSITORY")),
            run_id: run_id.or_else(|| env("GITHUB_RUN_ID")),
            pull_request,
        }
    }
}

/// Extracts `<n>` from `refs/pull/<n>/merge`.
pub fn pull_request_number(git_ref: &str) -> Option<u64> {
    git_ref
        .strip_prefix("refs/pull/")?
        .split('/')
        .next()?
        .parse()
        .ok()
}
