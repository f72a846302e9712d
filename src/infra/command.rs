//! # Command Execution Module / 命令执行模块
//!
//! Process execution for install layers and test groups. Everything that
//! spawns a child process goes through the [`ProcessRunner`] trait so the
//! pipeline can be driven by a scripted runner in tests.
//!
//! 安装层和测试组的进程执行。所有派生子进程的操作都通过 [`ProcessRunner`] trait，
//! 以便在测试中用脚本化的运行器驱动流水线。

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;

/// A fully rendered command, ready to be spawned.
/// 一个完全渲染好、可以派生的命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Short label used in logs, e.g. the layer or group name.
    /// 日志中使用的简短标签，例如层名或测试组名。
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, String)>,
    /// Wall-clock ceiling. `None` means the platform ceiling applies.
    /// 墙钟时间上限。`None` 表示由平台的上限约束。
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Builds an invocation from an argv vector. Returns `None` for an empty argv.
    pub fn from_argv(label: impl Into<String>, argv: Vec<String>, cwd: PathBuf) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next()?;
        Some(Self {
            label: label.into(),
            program,
            args: parts.collect(),
            cwd,
            envs: Vec::new(),
            timeout: None,
        })
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as a shell-quoted string, for logs and error messages.
    /// 以 shell 转义字符串形式表示的命令行，用于日志和错误消息。
    pub fn command_line(&self) -> String {
        let argv = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(argv.clone()).unwrap_or_else(|_| argv.collect::<Vec<_>>().join(" "))
    }
}

/// How a child process ended.
/// 子进程的结束方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    /// Terminated by a signal, no exit code available.
    Terminated,
    /// Killed after exceeding the invocation's ceiling.
    TimedOut,
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exit code {code}"),
            ExitState::Terminated => write!(f, "termination by signal"),
            ExitState::TimedOut => write!(f, "timeout"),
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub state: ExitState,
    /// Interleaved stdout and stderr.
    pub output: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.state == ExitState::Exited(0)
    }
}

/// Seam between the pipeline and the operating system.
/// 流水线与操作系统之间的接缝。
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion. `Err` means the process could not be started.
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

/// Runs invocations as real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        tracing::debug!(label = %invocation.label, command = %invocation.command_line(), "spawning");

        let start = Instant::now();
        let mut output = String::new();
        let capture = capture_into(cmd, &mut output);
        let finished = match invocation.timeout {
            Some(ceiling) => tokio::time::timeout(ceiling, capture).await.ok(),
            None => Some(capture.await),
        };
        // The child is killed on drop; `output` keeps whatever arrived before the ceiling.
        let Some(status) = finished else {
            return Ok(ProcessOutput {
                state: ExitState::TimedOut,
                output,
                duration: start.elapsed(),
            });
        };
        let status = status?;

        Ok(ProcessOutput {
            state: status.code().map_or(ExitState::Terminated, ExitState::Exited),
            output,
            duration: start.elapsed(),
        })
    }
}

/// Spawns a command and captures stdout and stderr into one string.
/// The two streams are read concurrently and interleaved line by line.
/// Bytes that are not valid UTF-8 are replaced, never treated as end of output.
///
/// 派生一个命令，并将 stdout 和 stderr 捕获到同一个字符串中。
/// 两个流被并发读取，并逐行交错合并。非 UTF-8 字节会被替换，而不会被当作输出结束。
pub async fn spawn_and_capture(
    cmd: tokio::process::Command,
) -> (std::io::Result<std::process::ExitStatus>, String) {
    let mut output = String::new();
    let status = capture_into(cmd, &mut output).await;
    (status, output)
}

async fn capture_into(
    mut cmd: tokio::process::Command,
    output: &mut String,
) -> std::io::Result<std::process::ExitStatus> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(std::io::Error::other("failed to capture child output"));
    };

    {
        let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));

        while let Some(line) = lines.next().await {
            match line {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    output.push_str(text.strip_suffix('\r').unwrap_or(&text));
                    output.push('\n');
                }
                Err(e) => {
                    // Dropping the pipes below lets a child blocked on a full pipe exit.
                    tracing::warn!(error = %e, "failed to read child output");
                    break;
                }
            }
        }
    }

    child.wait().await
}
