//! # Resolver and Trigger Unit Tests / 解析器与触发器单元测试
//!
//! Tests for conditional runtime overrides and the trigger allow-list.
//!
//! 测试条件性运行时覆盖和触发器允许列表。

use matrix_orchestrator::config::PipelineConfig;
use matrix_orchestrator::core::error::ConfigurationError;
use matrix_orchestrator::core::matrix::Matrix;
use matrix_orchestrator::core::models::JobSpec;
use matrix_orchestrator::core::resolver::{OverrideRule, VersionResolver};
use matrix_orchestrator::core::trigger::{TriggerEvent, TriggerPolicy, pull_request_number};

fn default_matrix() -> Matrix {
    Matrix::new(&PipelineConfig::example().matrix).unwrap()
}

fn rule(os: Option<&str>, runtime: Option<&str>, replacement: &str) -> OverrideRule {
    OverrideRule {
        os: os.map(str::to_string),
        runtime: runtime.map(str::to_string),
        framework: None,
        replacement: replacement.to_string(),
        reason: None,
    }
}

#[cfg(test)]
mod resolver_tests {
    use super::*;

    #[test]
    fn test_macos_patch_override() {
        let config = PipelineConfig::example();
        let matrix = default_matrix();
        let resolver = VersionResolver::for_matrix(config.overrides, &matrix).unwrap();

        let macos = resolver.resolve(&JobSpec::new(5, "macOS-latest", "3.7", "1.13.1"));
        assert_eq!(macos.effective_runtime, "3.7.16");
        let applied = macos.applied.unwrap();
        assert_eq!(applied.rule, 0);
        assert!(applied.reason.unwrap().contains("lzma"));

        let ubuntu = resolver.resolve(&JobSpec::new(1, "ubuntu-latest", "3.7", "1.13.1"));
        assert_eq!(ubuntu.effective_runtime, "3.7");
        assert!(ubuntu.applied.is_none());
    }

    #[test]
    fn test_no_rules_is_identity() {
        let matrix = default_matrix();
        let resolver = VersionResolver::new(Vec::new());
        for job in resolver.resolve_all(matrix.jobs()) {
            assert_eq!(job.effective_runtime, job.spec.runtime_version);
            assert!(job.applied.is_none());
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let matrix = default_matrix();
        let resolver = VersionResolver::for_matrix(
            vec![
                rule(Some("macOS-latest"), Some("3.7"), "3.7.16"),
                rule(Some("macOS-latest"), None, "3.9.0"),
            ],
            &matrix,
        )
        .unwrap();

        let job = resolver.resolve(&JobSpec::new(5, "macOS-latest", "3.7", "1.13.1"));
        assert_eq!(job.effective_runtime, "3.7.16");
        let job = resolver.resolve(&JobSpec::new(6, "macOS-latest", "3.10", "1.13.1"));
        assert_eq!(job.effective_runtime, "3.9.0");
        assert_eq!(job.applied.unwrap().rule, 1);
    }

    #[test]
    fn test_resolution_never_drops_jobs() {
        let matrix = default_matrix();
        let resolver = VersionResolver::for_matrix(PipelineConfig::example().overrides, &matrix).unwrap();
        let resolved = resolver.resolve_all(matrix.jobs());
        assert_eq!(resolved.len(), matrix.jobs().len());
    }

    #[test]
    fn test_runtime_minor_of_patch_version() {
        let resolver = VersionResolver::new(vec![rule(Some("macOS-latest"), None, "3.7.16")]);
        let job = resolver.resolve(&JobSpec::new(5, "macOS-latest", "3.7", "1.13.1"));
        assert_eq!(job.runtime_minor(), "3.7");
    }

    #[test]
    fn test_rule_without_conditions_is_rejected() {
        let matrix = default_matrix();
        let result = VersionResolver::for_matrix(vec![rule(None, None, "3.7.16")], &matrix);
        assert_eq!(result.unwrap_err(), ConfigurationError::EmptyOverridePredicate(0));
    }

    #[test]
    fn test_rule_targeting_undeclared_value_is_rejected() {
        let matrix = default_matrix();
        let result = VersionResolver::for_matrix(
            vec![rule(Some("macOS-latest"), Some("3.8"), "3.8.1")],
            &matrix,
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::UnknownOverrideTarget { index: 0, axis: "runtime", .. })
        ));
    }
}

#[cfg(test)]
mod trigger_tests {
    use super::*;

    #[test]
    fn test_default_push_branches() {
        let policy = TriggerPolicy::default();
        assert!(policy.allows(&TriggerEvent::push("main")));
        assert!(policy.allows(&TriggerEvent::push("dev")));
        assert!(policy.allows(&TriggerEvent::push("temp_test_branch")));
        assert!(!policy.allows(&TriggerEvent::push("feature/x")));
    }

    #[test]
    fn test_pull_requests_are_gated_on_target() {
        let policy = TriggerPolicy::default();
        assert!(policy.allows(&TriggerEvent::pull_request("feature/x", "dev")));
        assert!(!policy.allows(&TriggerEvent::pull_request("feature/x", "main")));
        assert!(!policy.allows(&TriggerEvent::pull_request("dev", "main")));
    }

    #[test]
    fn test_explicit_values_build_the_event() {
        let event = TriggerEvent::from_platform(
            Some("pull_request".parse().unwrap()),
            Some("feature".to_string()),
            Some("dev".to_string()),
        )
        .unwrap();
        assert_eq!(event, TriggerEvent::pull_request("feature", "dev"));
        assert_eq!(event.to_string(), "pull_request feature -> dev");
    }

    #[test]
    fn test_pull_request_without_head_ref_is_gated_on_target_alone() {
        let policy = TriggerPolicy::default();
        let into_main = TriggerEvent::pull_request("", "main");
        assert!(!policy.allows(&into_main));
        assert!(policy.allows(&TriggerEvent::pull_request("", "dev")));
        assert_eq!(into_main.to_string(), "pull_request -> main");
    }

    #[test]
    fn test_unknown_event_kind() {
        assert!("schedule".parse::<matrix_orchestrator::core::trigger::EventKind>().is_err());
    }

    #[test]
    fn test_pull_request_number_from_ref() {
        assert_eq!(pull_request_number("refs/pull/42/merge"), Some(42));
        assert_eq!(pull_request_number("refs/heads/main"), None);
        assert_eq!(pull_request_number("refs/pull/abc/merge"), None);
    }
}
