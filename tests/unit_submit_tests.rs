//! # Submission Unit Tests / 提交模块单元测试
//!
//! The Coveralls job document, idempotency keys, the file sink and the retry
//! loop. Nothing here talks to the network.
//!
//! Coveralls 作业文档、幂等密钥、文件接收端以及重试循环。这里不访问网络。

mod common;

use chrono::{TimeZone, Utc};
use common::RecordingSink;
use matrix_orchestrator::core::coverage::CoverageReport;
use matrix_orchestrator::core::models::{JobSpec, ResolvedJob};
use matrix_orchestrator::core::trigger::{CommitContext, TriggerEvent};
use matrix_orchestrator::infra::retry::RetryPolicy;
use matrix_orchestrator::reporting::submit::{
    CoverageSink, CoverallsSink, FileSink, Submission, SubmissionStatus, submit_with_retry,
};
use std::time::Duration;

fn submission(sha: &str, os: &str) -> Submission {
    let mut coverage = CoverageReport::new();
    coverage.record("pypots/data.py", 1, 3);
    coverage.record("pypots/data.py", 3, 0);
    coverage.touch_file("pypots/__init__.py");

    Submission {
        job: ResolvedJob {
            spec: JobSpec::new(1, os, "3.10", "1.13.1"),
            effective_runtime: "3.10".to_string(),
            applied: None,
        },
        event: TriggerEvent::push("main"),
        commit: CommitContext {
            sha: Some(sha.to_string()),
            branch: "main".to_string(),
            repository: Some("WenjieDu/PyPOTS".to_string()),
            run_id: Some("4242".to_string()),
            pull_request: None,
        },
        coverage,
        service_name: "github".to_string(),
        parallel: true,
        run_at: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
    }
}

#[cfg(test)]
mod payload_tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = submission("abc123", "ubuntu-latest").payload(Some("secret"));

        assert_eq!(payload["service_name"], "github");
        assert_eq!(payload["flag_name"], "ubuntu-latest-3.10-1.13.1");
        assert_eq!(payload["parallel"], true);
        assert_eq!(payload["repo_token"], "secret");
        assert_eq!(payload["service_job_id"], "4242");
        assert_eq!(payload["git"]["head"]["id"], "abc123");
        assert_eq!(payload["git"]["branch"], "main");
        assert!(payload.get("service_pull_request").is_none());

        let files = payload["source_files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "pypots/__init__.py");
        assert_eq!(files[0]["coverage"], serde_json::json!([]));
        assert_eq!(files[1]["name"], "pypots/data.py");
        assert_eq!(files[1]["coverage"], serde_json::json!([3, null, 0]));
    }

    #[test]
    fn test_payload_without_token_and_with_pull_request() {
        let mut sub = submission("abc123", "ubuntu-latest");
        sub.commit.pull_request = Some(17);
        let payload = sub.payload(None);
        assert!(payload.get("repo_token").is_none());
        assert_eq!(payload["service_pull_request"], "17");
    }

    #[test]
    fn test_idempotency_key_is_stable_per_commit_and_job() {
        let a = submission("abc123", "ubuntu-latest").idempotency_key();
        let b = submission("abc123", "ubuntu-latest").idempotency_key();
        let other_job = submission("abc123", "windows-latest").idempotency_key();
        let other_commit = submission("def456", "ubuntu-latest").idempotency_key();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, other_job);
        assert_ne!(a, other_commit);
    }

    #[test]
    fn test_idempotency_key_without_sha_uses_the_run_id() {
        let mut first_run = submission("abc123", "ubuntu-latest");
        first_run.commit.sha = None;
        let mut second_run = first_run.clone();
        second_run.commit.run_id = Some("4243".to_string());

        assert_ne!(first_run.idempotency_key(), second_run.idempotency_key());
        assert_eq!(first_run.idempotency_key(), first_run.clone().idempotency_key());
    }

    #[test]
    fn test_idempotency_key_separates_commit_from_slug() {
        // "ab" + "c-..." and "abc" + "-..." must not collide.
        let left = submission("ab", "c");
        let right = submission("abc", "");
        assert_eq!(format!("ab{}", left.job.slug()), format!("abc{}", right.job.slug()));
        assert_ne!(left.idempotency_key(), right.idempotency_key());
    }
}

#[cfg(test)]
mod sink_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_sink_writes_payload_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink {
            work_dir: dir.path().to_path_buf(),
            file_name: "coveralls.json".to_string(),
        };
        let receipt = sink.submit(&submission("abc123", "ubuntu-latest")).await.unwrap();

        let path = dir.path().join("ubuntu-latest-3.10-1.13.1").join("coveralls.json");
        assert_eq!(receipt.location, path.display().to_string());
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["flag_name"], "ubuntu-latest-3.10-1.13.1");
        assert!(written.get("repo_token").is_none());
    }

    #[tokio::test]
    async fn test_coveralls_without_token_fails_without_sending() {
        let sink = CoverallsSink::new("http://127.0.0.1:9/api/v1/jobs", None);
        let status = submit_with_retry(
            &sink,
            &submission("abc123", "ubuntu-latest"),
            &RetryPolicy::exponential(3, Duration::ZERO),
        )
        .await;
        match status {
            SubmissionStatus::Failed { error, attempts } => {
                assert!(error.contains("no credentials"));
                assert_eq!(attempts, 1, "missing credentials are not retried");
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let sink = RecordingSink::failing(2);
        let status = submit_with_retry(
            &sink,
            &submission("abc123", "ubuntu-latest"),
            &RetryPolicy::exponential(3, Duration::ZERO),
        )
        .await;

        assert_eq!(
            status,
            SubmissionStatus::Submitted {
                location: "memory://ubuntu-latest-3.10-1.13.1".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(sink.received().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let sink = RecordingSink::failing(10);
        let status = submit_with_retry(
            &sink,
            &submission("abc123", "ubuntu-latest"),
            &RetryPolicy::exponential(2, Duration::ZERO),
        )
        .await;

        assert!(matches!(status, SubmissionStatus::Failed { attempts: 2, .. }));
        assert_eq!(sink.attempts(), 2);
        assert_eq!(status.label(), "failed");
    }

    #[test]
    fn test_backoff_doubles_and_is_capped() {
        let policy = RetryPolicy::exponential(8, Duration::from_secs(2));
        let mut handle = policy.handle();
        let delays: Vec<Duration> = std::iter::from_fn(|| handle.next_delay()).collect();
        assert_eq!(delays.len(), 7);
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert_eq!(delays[2], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(30));
    }
}
