//! # Test Runner Unit Tests / 测试运行器单元测试
//!
//! Suite discovery and partitioning, worker counts, pytest summary parsing,
//! and grouped runs driven by a scripted runner.
//!
//! 测试套件的发现与划分、工作者数量、pytest 摘要解析，以及由脚本化运行器驱动的分组运行。

mod common;

use common::{FakeRunner, Reply, pytest_summary, python_project};
use matrix_orchestrator::core::config::{CoverageConfig, TestsConfig, WorkerCount};
use matrix_orchestrator::core::error::{ConfigurationError, EnvironmentError};
use matrix_orchestrator::core::runner::{
    CaseStatus, TestRunner, discover_suite, parse_pytest_summary, partition_suite, resolve_workers,
    select_groups,
};
use matrix_orchestrator::infra::template::TemplateVars;
use std::fs;
use std::path::PathBuf;

fn vars() -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.set("python", "python3.10")
        .set("framework", "1.13.1")
        .set("job", "ubuntu-latest-3.10-1.13.1");
    vars
}

#[cfg(test)]
mod partition_tests {
    use super::*;

    #[test]
    fn test_discovery_skips_root_files_and_caches() {
        let project = python_project(&["data", "models"]);
        let root = project.path().join("tests");
        fs::create_dir_all(root.join("models").join("nested")).unwrap();
        fs::write(root.join("models").join("nested").join("test_deep.py"), "").unwrap();
        fs::write(root.join("models").join("README.md"), "").unwrap();

        let files = discover_suite(&root, &["py".to_string()]).unwrap();
        let relative: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            relative,
            vec!["data/test_data.py", "models/nested/test_deep.py", "models/test_models.py"]
        );
    }

    #[test]
    fn test_partition_is_disjoint_and_covers_every_member() {
        let root = PathBuf::from("/p/tests");
        let files = vec![
            root.join("imputation/test_saits.py"),
            root.join("data/test_load.py"),
            root.join("imputation/deep/test_brits.py"),
            root.join("conftest.py"),
            PathBuf::from("/elsewhere/test_x.py"),
        ];
        let groups = partition_suite(&root, &files);

        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["data", "imputation"]);
        assert_eq!(groups[0].files, vec![root.join("data/test_load.py")]);
        assert_eq!(
            groups[1].files,
            vec![
                root.join("imputation/deep/test_brits.py"),
                root.join("imputation/test_saits.py"),
            ]
        );
        assert_eq!(groups[1].path, root.join("imputation"));
        let total: usize = groups.iter().map(|g| g.files.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_group_selection() {
        let root = PathBuf::from("/p/tests");
        let files = vec![root.join("a/test_a.py"), root.join("b/test_b.py")];
        let groups = partition_suite(&root, &files);

        assert_eq!(select_groups(groups.clone(), &[], &root).unwrap().len(), 2);
        let only_b = select_groups(groups, &["b".to_string()], &root).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].name, "b");
    }

    #[test]
    fn test_unknown_group_name_is_rejected() {
        let root = PathBuf::from("/p/tests");
        let files = vec![root.join("data/test_a.py"), root.join("models/test_b.py")];
        let groups = partition_suite(&root, &files);

        let names = vec!["models".to_string(), "dta".to_string()];
        assert_eq!(
            select_groups(groups, &names, &root).unwrap_err(),
            ConfigurationError::UnknownTestGroup {
                name: "dta".to_string(),
                root: root.display().to_string(),
            }
        );
    }

    #[test]
    fn test_worker_count_is_bounded() {
        assert_eq!(resolve_workers(WorkerCount::Fixed(4), 8, 10), 4);
        assert_eq!(resolve_workers(WorkerCount::Fixed(16), 8, 10), 8);
        assert_eq!(resolve_workers(WorkerCount::Fixed(4), 8, 2), 2);
        assert_eq!(resolve_workers(WorkerCount::Fixed(4), 8, 0), 1);
        let auto = resolve_workers(WorkerCount::Auto, 3, 10);
        assert!((1..=3).contains(&auto));
    }
}

#[cfg(test)]
mod summary_tests {
    use super::*;

    #[test]
    fn test_parses_only_after_summary_header() {
        let output = pytest_summary(&[
            "PASSED tests/data/test_load.py::test_ok",
            "FAILED tests/data/test_load.py::test_bad - AssertionError: 1 != 2",
            "ERROR tests/data/test_load.py::test_fixture - RuntimeError",
            "SKIPPED [1] tests/data/test_load.py:12: needs gpu",
            "XFAIL tests/data/test_load.py::test_known - reason",
        ]);
        let cases = parse_pytest_summary(&output);

        assert_eq!(cases.len(), 5);
        assert_eq!(cases[0].status, CaseStatus::Passed);
        assert_eq!(cases[1].id, "tests/data/test_load.py::test_bad");
        assert_eq!(cases[1].status, CaseStatus::Failed);
        assert_eq!(cases[2].status, CaseStatus::Error);
        assert_eq!(cases[3].status, CaseStatus::Skipped);
        assert_eq!(cases[3].id, "tests/data/test_load.py:12: needs gpu");
        assert!(!cases[4].status.is_failure());
        assert_eq!(cases.iter().filter(|c| c.status.is_failure()).count(), 2);
    }

    #[test]
    fn test_output_without_header_is_read_whole() {
        let cases = parse_pytest_summary("PASSED t/test_a.py::test_one\nrandom line\n");
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, "t/test_a.py::test_one");
    }
}

#[cfg(test)]
mod run_tests {
    use super::*;

    fn tests_config() -> TestsConfig {
        TestsConfig {
            workers: WorkerCount::Fixed(2),
            ..TestsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_groups_run_independently_and_merge_coverage() {
        let project = python_project(&["data", "models", "utils"]);
        let job_dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new()
            .on(
                "data",
                Reply::ok(&pytest_summary(&["PASSED tests/data/test_data.py::test_ok"]))
                    .with_lcov("SF:pypots/data.py\nDA:1,1\nDA:2,0\nend_of_record\n"),
            )
            .on(
                "models",
                Reply::exit(
                    1,
                    &pytest_summary(&["FAILED tests/models/test_models.py::test_fit - boom"]),
                )
                .with_lcov("SF:pypots/data.py\nDA:2,4\nend_of_record\nSF:pypots/models.py\nDA:7,1\nend_of_record\n"),
            );

        let tests = tests_config();
        let coverage = CoverageConfig::default();
        let test_runner = TestRunner {
            tests: &tests,
            coverage: &coverage,
            runner: &runner,
        };
        let result = test_runner.run(&vars(), project.path(), job_dir.path()).await.unwrap();

        let names: Vec<&str> = result.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["data", "models", "utils"]);
        assert_eq!(result.workers, 2);
        assert!(result.failed());
        assert_eq!(result.failed_case_count(), 1);
        assert_eq!(result.failed_groups(), vec!["models".to_string()]);

        let merged = result.coverage();
        assert_eq!(merged.hits("pypots/data.py", 1), Some(1));
        assert_eq!(merged.hits("pypots/data.py", 2), Some(4));
        assert_eq!(merged.hits("pypots/models.py", 7), Some(1));

        // Stale bytecode caches were removed before the run.
        assert!(!project.path().join("tests/data/__pycache__").exists());
    }

    #[tokio::test]
    async fn test_group_invocation_is_rendered_per_group() {
        let project = python_project(&["data"]);
        let job_dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let tests = tests_config();
        let coverage = CoverageConfig {
            target: "demo_package".to_string(),
            ..CoverageConfig::default()
        };
        let test_runner = TestRunner {
            tests: &tests,
            coverage: &coverage,
            runner: &runner,
        };
        test_runner.run(&vars(), project.path(), job_dir.path()).await.unwrap();

        let calls = runner.calls_labelled("data");
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, "python3.10");
        assert_eq!(call.cwd, project.path());
        assert!(call.args.contains(&"tests/data".to_string()));
        assert!(call.args.contains(&"--cov=demo_package".to_string()));
        assert!(call.args.contains(&"--cov-config=.coveragerc".to_string()));
        let lcov = job_dir.path().join("coverage").join("data.lcov");
        assert!(call.args.contains(&format!("--cov-report=lcov:{}", lcov.display())));

        let data_file = job_dir.path().join("coverage").join(".coverage.data");
        assert!(
            call.envs
                .contains(&("COVERAGE_FILE".to_string(), data_file.display().to_string()))
        );
        assert_eq!(call.timeout, Some(std::time::Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_crashed_group_counts_as_failure() {
        let project = python_project(&["data"]);
        let job_dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new().on("data", Reply::exit(2, "INTERNALERROR> boom\n"));
        let tests = tests_config();
        let coverage = CoverageConfig::default();
        let test_runner = TestRunner {
            tests: &tests,
            coverage: &coverage,
            runner: &runner,
        };
        let result = test_runner.run(&vars(), project.path(), job_dir.path()).await.unwrap();

        assert!(result.failed());
        let failed: Vec<&str> = result.groups[0].failed_cases().map(|c| c.id.as_str()).collect();
        assert_eq!(failed, vec!["data::<session>"]);
        assert!(result.coverage().is_empty());
    }

    #[tokio::test]
    async fn test_empty_suite_is_a_failed_stage() {
        let project = python_project(&[]);
        let job_dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let tests = tests_config();
        let coverage = CoverageConfig::default();
        let test_runner = TestRunner {
            tests: &tests,
            coverage: &coverage,
            runner: &runner,
        };
        let error = test_runner.run(&vars(), project.path(), job_dir.path()).await.unwrap_err();

        let error = error.downcast_ref::<EnvironmentError>().unwrap();
        assert!(matches!(error, EnvironmentError::EmptySuite { .. }));
        assert_eq!(error.stage(), "tests");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mistyped_group_selection_runs_nothing() {
        let project = python_project(&["data"]);
        let job_dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let mut tests = tests_config();
        tests.groups = vec!["dta".to_string()];
        let coverage = CoverageConfig::default();
        let test_runner = TestRunner {
            tests: &tests,
            coverage: &coverage,
            runner: &runner,
        };
        let error = test_runner.run(&vars(), project.path(), job_dir.path()).await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::UnknownTestGroup { name, .. }) if name == "dta"
        ));
        assert!(runner.calls().is_empty());
    }
}
