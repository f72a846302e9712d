//! # Command Template Unit Tests / 命令模板单元测试
//!
//! Rendering of `{placeholder}` command templates into argv vectors.
//!
//! 将 `{placeholder}` 命令模板渲染为 argv 向量。

use matrix_orchestrator::infra::command::Invocation;
use matrix_orchestrator::infra::template::{
    TemplateError, TemplateVars, check, placeholders, render_command, render_str,
};
use std::path::PathBuf;

fn vars() -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.set("python", "/work/job/venv/bin/python")
        .set("framework", "1.13.1")
        .set("group_path", "tests/data dir")
        .set_many(
            "extensions",
            vec!["torch-scatter==2.1.1".to_string(), "torch-sparse==0.6.17".to_string()],
        );
    vars
}

#[cfg(test)]
mod render_tests {
    use super::*;

    #[test]
    fn test_placeholders_inside_tokens() {
        let argv = render_command("{python} -m pip install torch=={framework}", &vars()).unwrap();
        assert_eq!(
            argv,
            vec!["/work/job/venv/bin/python", "-m", "pip", "install", "torch==1.13.1"]
        );
    }

    #[test]
    fn test_values_with_spaces_stay_one_argument() {
        let argv = render_command("pytest {group_path} -s", &vars()).unwrap();
        assert_eq!(argv, vec!["pytest", "tests/data dir", "-s"]);
    }

    #[test]
    fn test_list_placeholder_splices_arguments() {
        let argv = render_command("pip install {extensions} -f url", &vars()).unwrap();
        assert_eq!(
            argv,
            vec!["pip", "install", "torch-scatter==2.1.1", "torch-sparse==0.6.17", "-f", "url"]
        );
    }

    #[test]
    fn test_list_placeholder_inside_a_token_is_joined() {
        let argv = render_command("echo pins:{extensions}", &vars()).unwrap();
        assert_eq!(argv, vec!["echo", "pins:torch-scatter==2.1.1 torch-sparse==0.6.17"]);
    }

    #[test]
    fn test_quoted_token_keeps_its_spaces() {
        let argv = render_command(
            "{python} -c \"import torch; print(torch.__version__)\"",
            &vars(),
        )
        .unwrap();
        assert_eq!(argv[1], "-c");
        assert_eq!(argv[2], "import torch; print(torch.__version__)");
    }

    #[test]
    fn test_doubled_braces_are_literal() {
        assert_eq!(render_str("{{literal}} {framework}", &vars()).unwrap(), "{literal} 1.13.1");
    }

    #[test]
    fn test_missing_binding_and_empty_command() {
        assert_eq!(
            render_command("{unknown}", &vars()),
            Err(TemplateError::UnknownPlaceholder("unknown".to_string()))
        );
        assert_eq!(render_command("   ", &vars()), Err(TemplateError::Empty));
        assert_eq!(render_command("echo 'open", &vars()), Err(TemplateError::UnbalancedQuotes));
    }

    #[test]
    fn test_check_lists_placeholders() {
        assert_eq!(
            placeholders("{python} -m pytest {group_path} --cov={cov_target}"),
            vec!["python", "group_path", "cov_target"]
        );
        assert!(check("{python} -m pytest", &["python"]).is_ok());
        assert_eq!(
            check("{python} {group}", &["python"]),
            Err(TemplateError::UnknownPlaceholder("group".to_string()))
        );
    }
}

#[cfg(test)]
mod invocation_tests {
    use super::*;

    #[test]
    fn test_invocation_from_rendered_argv() {
        let argv = render_command("pytest {group_path} -s", &vars()).unwrap();
        let invocation = Invocation::from_argv("data", argv, PathBuf::from("/project"))
            .unwrap()
            .with_env("COVERAGE_FILE", "/work/.coverage.data");

        assert_eq!(invocation.program, "pytest");
        assert_eq!(invocation.args, vec!["tests/data dir", "-s"]);
        assert_eq!(invocation.command_line(), "pytest 'tests/data dir' -s");
        assert_eq!(invocation.envs.len(), 1);
    }

    #[test]
    fn test_empty_argv_has_no_invocation() {
        assert!(Invocation::from_argv("x", Vec::new(), PathBuf::from(".")).is_none());
    }
}
