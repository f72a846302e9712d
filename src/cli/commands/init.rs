//! # Pipeline Initialization Module / 流水线初始化模块
//!
//! Creates a `Pipeline.toml` through an interactive wizard, or writes the
//! default declaration with `--non-interactive`. The default reproduces a
//! three-platform, two-runtime, one-framework matrix with CPU-only wheels.
//!
//! 通过交互式向导创建 `Pipeline.toml`，或使用 `--non-interactive` 写入默认声明。
//! 默认声明是三个平台、两个运行时版本、一个框架版本、仅使用 CPU 轮子的矩阵。
//!
//! ## Features / 功能特性
//!
//! - **Interactive Wizard**: pick platforms, runtime and framework versions
//! - **Package Detection**: coverage target read from `pyproject.toml`
//! - **Overwrite Protection**: confirmation (or `--force`) before replacing a config
//!
//! - **交互式向导**: 选择平台、运行时版本和框架版本
//! - **包检测**: 从 `pyproject.toml` 读取覆盖率目标
//! - **覆盖保护**: 替换已有配置前需要确认（或使用 `--force`）

use anyhow::{Context, Result, bail};
use colored::*;
use dialoguer::{Confirm, Input, MultiSelect, Select, theme::ColorfulTheme};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::core::config::{PipelineConfig, ReportService};
use crate::core::matrix::Axis;

/// The `[project]` table of a `pyproject.toml`.
#[derive(Deserialize)]
struct Project {
    name: String,
}

#[derive(Deserialize)]
struct PyProject {
    project: Project,
}

const PLATFORMS: [&str; 3] = ["ubuntu-latest", "windows-latest", "macOS-latest"];

/// Runs the wizard (or writes the default) and saves the result to `path`.
///
/// # Arguments / 参数
/// * `path` - Where the config is written / 配置写入的位置
/// * `non_interactive` - Write the default without prompting / 不提示，直接写入默认配置
/// * `force` - Overwrite an existing file without asking / 不询问，直接覆盖已有文件
///
/// 运行向导（或写入默认配置）并将结果保存到 `path`。
pub fn run_init_wizard(path: &Path, non_interactive: bool, force: bool) -> Result<()> {
    let theme = ColorfulTheme::default();

    if path.exists() && !force {
        if non_interactive {
            bail!("{} already exists, pass --force to overwrite it", path.display());
        }
        let confirmation = Confirm::with_theme(&theme)
            .with_prompt(format!("{} already exists. Overwrite it?", path.display()))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmation {
            println!("{}", "Aborted, nothing was written.".yellow());
            return Ok(());
        }
    }

    let mut config = PipelineConfig::example();
    let detected = detect_package_name().ok();
    if let Some(name) = &detected {
        config.coverage.target = name.replace('-', "_");
    }

    if !non_interactive {
        println!("\n{}", "Welcome to the pipeline setup wizard".cyan().bold());
        println!("Answer a few questions to generate {}.\n", path.display());
        if let Some(name) = &detected {
            println!("Detected package {}", name.green());
        }
        prompt_for_pipeline(&theme, &mut config)?;
    }

    write_config(path, &config)
}

fn prompt_for_pipeline(theme: &ColorfulTheme, config: &mut PipelineConfig) -> Result<()> {
    let platforms = MultiSelect::with_theme(theme)
        .with_prompt("Platforms to test on")
        .items(&PLATFORMS)
        .defaults(&[true, true, true])
        .interact()
        .context("Failed to read platform selection")?;
    if platforms.is_empty() {
        bail!("at least one platform is required");
    }
    let platforms: Vec<&str> = platforms.into_iter().map(|i| PLATFORMS[i]).collect();

    let runtimes: String = Input::with_theme(theme)
        .with_prompt("Runtime versions (comma separated)")
        .default("3.7, 3.10".to_string())
        .interact_text()?;
    let frameworks: String = Input::with_theme(theme)
        .with_prompt("Framework versions (comma separated)")
        .default("1.13.1".to_string())
        .interact_text()?;
    let target: String = Input::with_theme(theme)
        .with_prompt("Package measured by coverage")
        .default(config.coverage.target.clone())
        .interact_text()?;
    let service = Select::with_theme(theme)
        .with_prompt("Coverage service")
        .items(&["coveralls", "file", "none"])
        .default(0)
        .interact()?;

    let split = |list: &str| -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    };
    let runtimes = split(&runtimes);
    let frameworks = split(&frameworks);

    config.matrix.axes = vec![
        Axis::new("os", &platforms),
        Axis {
            name: "runtime".to_string(),
            values: runtimes,
        },
        Axis {
            name: "framework".to_string(),
            values: frameworks,
        },
    ];
    // Keep only the overrides that still target declared values.
    let declared = config.matrix.clone();
    config.overrides.retain(|rule| {
        rule.os.as_deref().is_none_or(|os| platforms.iter().any(|p| *p == os))
            && rule
                .runtime
                .as_deref()
                .is_none_or(|rt| declared.axes[1].contains(rt))
            && rule
                .framework
                .as_deref()
                .is_none_or(|fw| declared.axes[2].contains(fw))
    });
    config.coverage.target = target;
    config.report.service = match service {
        0 => ReportService::Coveralls,
        1 => ReportService::File,
        _ => ReportService::None,
    };
    Ok(())
}

fn write_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    config
        .clone()
        .validate()
        .context("The generated pipeline is invalid")?;
    let toml_string = toml::to_string_pretty(config).context("Failed to serialize the pipeline")?;
    fs::write(path, toml_string).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("\n{} {}", "✔".green(), format!("Created {}", path.display()).bold());
    println!("Run `matrix-orchestrator plan` to review the job matrix.");
    Ok(())
}

/// Reads the distribution name from `pyproject.toml` in the current directory.
/// 从当前目录的 `pyproject.toml` 读取发行包名称。
fn detect_package_name() -> Result<String> {
    let content = fs::read_to_string("pyproject.toml").context("pyproject.toml not found")?;
    let manifest: PyProject = toml::from_str(&content).context("Failed to parse pyproject.toml")?;
    Ok(manifest.project.name)
}
