//! # Coverage Submission Module / 覆盖率提交模块
//!
//! Hands a finished job's coverage to an external tracking service. The
//! pipeline builds an immutable [`Submission`] and passes it to a
//! [`CoverageSink`]; whatever the sink reports is recorded on the job, and a
//! failed submission never changes the job's outcome.
//!
//! 将已完成作业的覆盖率交给外部跟踪服务。流水线构建一个不可变的 [`Submission`]
//! 并交给 [`CoverageSink`]；接收端的结果会记录在作业上，提交失败永远不会改变作业的结果。

use crate::core::coverage::CoverageReport;
use crate::core::error::ReportingError;
use crate::core::models::ResolvedJob;
use crate::core::trigger::{CommitContext, TriggerEvent};
use crate::infra::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

/// Everything a sink needs to deliver one job's report.
/// 接收端投递一个作业报告所需的全部信息。
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: ResolvedJob,
    pub event: TriggerEvent,
    pub commit: CommitContext,
    pub coverage: CoverageReport,
    pub service_name: String,
    pub parallel: bool,
    pub run_at: DateTime<Utc>,
}

impl Submission {
    /// `sha256(origin NUL job slug)` as hex, where the origin is the commit sha or,
    /// without one, the workflow run id. Resubmitting the same job for the same
    /// origin produces the same key.
    ///
    /// 以十六进制表示的 `sha256(来源 NUL 作业 slug)`，来源是提交 sha，没有 sha 时为工作流运行 ID。
    /// 同一来源的同一作业重复提交时密钥相同。
    pub fn idempotency_key(&self) -> String {
        let origin = match (self.commit.sha.as_deref(), self.commit.run_id.as_deref()) {
            (Some(sha), _) if !sha.is_empty() => format!("commit:{sha}"),
            (_, Some(run_id)) => format!("run:{run_id}"),
            _ => String::new(),
        };
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.job.slug().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The Coveralls job document. `repo_token` is omitted when `None`.
    pub fn payload(&self, repo_token: Option<&str>) -> Value {
        let source_files: Vec<Value> = self
            .coverage
            .files()
            .map(|(name, lines)| {
                let length = lines.keys().next_back().copied().unwrap_or_default() as usize;
                let mut coverage: Vec<Option<u64>> = vec![None; length];
                for (line, hits) in lines {
                    if let Some(slot) = (*line as usize).checked_sub(1).and_then(|i| coverage.get_mut(i)) {
                        *slot = Some(*hits);
                    }
                }
                json!({ "name": name, "coverage": coverage })
            })
            .collect();

        let mut payload = json!({
            "service_name": self.service_name,
            "flag_name": self.job.slug(),
            "parallel": self.parallel,
            "run_at": self.run_at.to_rfc3339(),
            "git": {
                "head": { "id": self.commit.sha },
                "branch": self.commit.branch,
            },
            "source_files": source_files,
        });
        if let Some(map) = payload.as_object_mut() {
            if let Some(token) = repo_token {
                map.insert("repo_token".into(), json!(token));
            }
            if let Some(run_id) = &self.commit.run_id {
                map.insert("service_job_id".into(), json!(run_id));
            }
            if let Some(number) = self.commit.pull_request {
                map.insert("service_pull_request".into(), json!(number.to_string()));
            }
        }
        payload
    }
}

/// Where a report ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    /// URL or file path of the accepted report.
    pub location: String,
}

/// Outcome recorded on the job report.
/// 记录在作业报告上的提交结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Submission was turned off (`report.service = "none"` or `--no-submit`).
    Disabled,
    Submitted { location: String, attempts: usize },
    Failed { error: String, attempts: usize },
}

impl SubmissionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionStatus::Disabled => "disabled",
            SubmissionStatus::Submitted { .. } => "submitted",
            SubmissionStatus::Failed { .. } => "failed",
        }
    }
}

/// Destination for coverage reports. Implementations fail independently of the pipeline.
/// 覆盖率报告的目的地。其实现的失败与流水线相互独立。
#[async_trait]
pub trait CoverageSink: Send + Sync {
    fn name(&self) -> &str;
    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, ReportingError>;
}

/// Uploads to the Coveralls jobs API as a multipart `json_file`.
pub struct CoverallsSink {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl CoverallsSink {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl CoverageSink for CoverallsSink {
    fn name(&self) -> &str {
        "coveralls"
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, ReportingError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ReportingError::MissingCredentials("coveralls".to_string()))?;

        let body = serde_json::to_vec(&submission.payload(Some(token)))?;
        let part = reqwest::multipart::Part::bytes(body)
            .file_name("coverage.json")
            .mime_str("application/json")?;
        let form = reqwest::multipart::Form::new().part("json_file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", submission.idempotency_key())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ReportingError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let location = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("url").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| self.endpoint.clone());
        Ok(SubmitReceipt { location })
    }
}

/// Writes the payload to `<work_dir>/<job slug>/<file_name>` instead of uploading it.
/// 将负载写入 `<work_dir>/<作业 slug>/<file_name>`，而不是上传。
pub struct FileSink {
    pub work_dir: PathBuf,
    pub file_name: String,
}

#[async_trait]
impl CoverageSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn submit(&self, submission: &Submission) -> Result<SubmitReceipt, ReportingError> {
        let dir = self.work_dir.join(submission.job.slug());
        fs::create_dir_all(&dir)?;
        let path = dir.join(&self.file_name);
        let body = serde_json::to_string_pretty(&submission.payload(None))?;
        fs::write(&path, body)?;
        Ok(SubmitReceipt {
            location: path.display().to_string(),
        })
    }
}

fn is_retryable(error: &ReportingError) -> bool {
    match error {
        ReportingError::Transport(_) => true,
        ReportingError::Rejected { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Submits with retries on transport errors and server-side rejections.
/// Never returns an error: the outcome is folded into the status.
///
/// 在传输错误和服务端拒绝时重试提交。永远不会返回错误：结果被折叠进状态中。
pub async fn submit_with_retry(
    sink: &dyn CoverageSink,
    submission: &Submission,
    policy: &RetryPolicy,
) -> SubmissionStatus {
    let mut retry = policy.handle();
    loop {
        let attempts = retry.attempts() + 1;
        match sink.submit(submission).await {
            Ok(receipt) => {
                tracing::info!(sink = sink.name(), job = %submission.job.slug(), location = %receipt.location, "coverage submitted");
                return SubmissionStatus::Submitted {
                    location: receipt.location,
                    attempts,
                };
            }
            Err(error) => {
                let delay = if is_retryable(&error) { retry.next_delay() } else { None };
                match delay {
                    Some(delay) => {
                        tracing::warn!(sink = sink.name(), attempt = attempts, error = %error, "coverage submission failed, retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(sink = sink.name(), attempt = attempts, error = %error, "coverage submission failed");
                        return SubmissionStatus::Failed {
                            error: error.to_string(),
                            attempts,
                        };
                    }
                }
            }
        }
    }
}
