//! # Pipeline Configuration Module / 流水线配置模块
//!
//! Loads `Pipeline.toml` and validates it into the structures the pipeline
//! runs on. Every check that can fail before a job starts happens here, so a
//! bad declaration never produces a partially executed matrix.
//!
//! 加载 `Pipeline.toml` 并将其校验为流水线运行所需的结构。
//! 所有能在作业开始前失败的检查都在这里进行，因此错误的声明永远不会导致矩阵部分执行。

use crate::core::error::ConfigurationError;
use crate::core::installer::{InstallGraph, LayerConfig, default_layers};
use crate::core::matrix::{Axis, AXIS_FRAMEWORK, Matrix, MatrixConfig};
use crate::core::resolver::{OverrideRule, VersionResolver};
use crate::core::trigger::TriggerPolicy;
use crate::infra::template::{self, TemplateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// The default name of the pipeline declaration.
/// 流水线声明文件的默认名称。
pub const CONFIG_FILE_NAME: &str = "Pipeline.toml";

/// Placeholders available to `[environment] interpreter`.
pub const INTERPRETER_PLACEHOLDERS: &[&str] =
    &["runtime", "runtime_minor", "framework", "project_dir", "job"];

/// Placeholders available to `[environment] create`.
pub const ENVIRONMENT_PLACEHOLDERS: &[&str] = &[
    "interpreter",
    "env_dir",
    "runtime",
    "runtime_minor",
    "framework",
    "project_dir",
    "job",
];

/// Placeholders available to `extension_index_url`.
pub const INDEX_URL_PLACEHOLDERS: &[&str] = &["framework", "runtime", "runtime_minor"];

/// Placeholders available to install layer commands and inspection commands.
/// 安装层命令与环境检查命令可用的占位符。
pub const INSTALL_PLACEHOLDERS: &[&str] = &[
    "python",
    "runtime",
    "runtime_minor",
    "framework",
    "requirements",
    "cpu_index_url",
    "extension_index_url",
    "extensions",
    "env_dir",
    "project_dir",
    "job",
];

/// Placeholders available to the test command. Install placeholders plus per-group values.
/// 测试命令可用的占位符：安装占位符加上每个分组特有的值。
pub const TEST_PLACEHOLDERS: &[&str] = &[
    "python",
    "runtime",
    "runtime_minor",
    "framework",
    "requirements",
    "cpu_index_url",
    "extension_index_url",
    "extensions",
    "env_dir",
    "project_dir",
    "job",
    "group",
    "group_path",
    "cov_target",
    "cov_config",
    "coverage_file",
];

/// Top-level structure of `Pipeline.toml`.
/// `Pipeline.toml` 的顶层结构。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub trigger: TriggerPolicy,
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

fn default_name() -> String {
    "test-matrix".to_string()
}

/// How each job's isolated environment is created.
/// 每个作业的隔离环境如何创建。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Interpreter for the job's runtime version, e.g. `python{runtime_minor}`.
    pub interpreter: String,
    /// Creates the environment at `{env_dir}`. Empty disables provisioning and
    /// runs layers with the interpreter directly.
    ///
    /// 在 `{env_dir}` 创建环境。为空时不创建环境，直接使用解释器执行各层。
    pub create: String,
    /// Commands whose output is saved to `environment.txt` after installation.
    pub inspect: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            interpreter: "python{runtime_minor}".to_string(),
            create: "{interpreter} -m venv {env_dir}".to_string(),
            inspect: vec!["{python} -m pip list".to_string()],
        }
    }
}

/// The `[install]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallConfig {
    pub requirements: String,
    pub cpu_index_url: String,
    pub extension_index_url: String,
    /// Default ceiling for each layer, in seconds. 0 disables it.
    pub timeout_secs: u64,
    /// Framework version to pinned extension packages (`name -> version`).
    /// 框架版本到固定版本扩展包的映射（`包名 -> 版本`）。
    pub compat: BTreeMap<String, BTreeMap<String, String>>,
    pub layers: Vec<LayerConfig>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        let pins = [
            ("torch-geometric", "2.3.1"),
            ("torch-scatter", "2.1.1"),
            ("torch-sparse", "0.6.17"),
        ]
        .into_iter()
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect();

        Self {
            requirements: "requirements.txt".to_string(),
            cpu_index_url: "https://download.pytorch.org/whl/cpu".to_string(),
            extension_index_url: "https://data.pyg.org/whl/torch-{framework}+cpu.html".to_string(),
            timeout_secs: 1800,
            compat: BTreeMap::from([("1.13.1".to_string(), pins)]),
            layers: default_layers(),
        }
    }
}

/// Worker count for the test runner: `"auto"` or a positive number.
/// 测试运行器的工作者数量：`"auto"` 或正整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "WorkerSetting", into = "WorkerSetting")]
pub enum WorkerCount {
    #[default]
    Auto,
    Fixed(usize),
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum WorkerSetting {
    Count(usize),
    Name(String),
}

impl TryFrom<WorkerSetting> for WorkerCount {
    type Error = String;

    fn try_from(setting: WorkerSetting) -> Result<Self, Self::Error> {
        match setting {
            WorkerSetting::Count(0) => Err("workers must be at least 1".to_string()),
            WorkerSetting::Count(n) => Ok(WorkerCount::Fixed(n)),
            WorkerSetting::Name(name) if name == "auto" => Ok(WorkerCount::Auto),
            WorkerSetting::Name(other) => {
                Err(format!("workers must be \"auto\" or a number, got \"{other}\""))
            }
        }
    }
}

impl From<WorkerCount> for WorkerSetting {
    fn from(count: WorkerCount) -> Self {
        match count {
            WorkerCount::Auto => WorkerSetting::Name("auto".to_string()),
            WorkerCount::Fixed(n) => WorkerSetting::Count(n),
        }
    }
}

/// How test groups are handed to workers. A group always stays on one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Group,
}

/// The `[tests]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TestsConfig {
    /// Suite root, relative to the project dir. Each immediate subdirectory is a group.
    /// 测试套件根目录（相对于项目目录）。每个直接子目录是一个分组。
    pub root: String,
    /// Restricts which groups run. Empty runs every group.
    pub groups: Vec<String>,
    /// File extensions that make a file a suite member.
    pub extensions: Vec<String>,
    pub workers: WorkerCount,
    pub max_workers: usize,
    pub distribution: Distribution,
    pub command: String,
    /// Ceiling for one group, in seconds. 0 disables it.
    pub timeout_secs: u64,
    /// Directory names removed under the suite root before running.
    pub clean: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            root: "tests".to_string(),
            groups: Vec::new(),
            extensions: vec!["py".to_string()],
            workers: WorkerCount::Auto,
            max_workers: 8,
            distribution: Distribution::Group,
            command: "{python} -m pytest -rA {group_path} -s --cov={cov_target} \
                      --cov-config={cov_config} --cov-report=lcov:{coverage_file}"
                .to_string(),
            timeout_secs: 3600,
            clean: vec!["__pycache__".to_string(), ".pytest_cache".to_string()],
        }
    }
}

/// The `[coverage]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Package measured by the coverage tool.
    pub target: String,
    pub config: String,
    /// Merged LCOV file name inside the job directory.
    pub output: String,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            target: "pypots".to_string(),
            config: ".coveragerc".to_string(),
            output: "coverage.lcov".to_string(),
        }
    }
}

/// Where coverage reports are submitted.
/// 覆盖率报告提交的目标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportService {
    #[default]
    Coveralls,
    /// Write the payload to `<job dir>/<report.file>` instead of uploading it.
    File,
    None,
}

/// The `[report]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    pub service: ReportService,
    pub endpoint: String,
    pub service_name: String,
    /// Tells the service more jobs of the same build will follow.
    pub parallel: bool,
    pub attempts: u32,
    pub backoff_ms: u64,
    pub file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            service: ReportService::Coveralls,
            endpoint: "https://coveralls.io/api/v1/jobs".to_string(),
            service_name: "github".to_string(),
            parallel: true,
            attempts: 1,
            backoff_ms: 2000,
            file: "coveralls.json".to_string(),
        }
    }
}

/// A configuration that passed validation, with its derived structures.
/// 通过校验的配置及其派生结构。
#[derive(Debug, Clone)]
pub struct ValidatedPipeline {
    pub config: PipelineConfig,
    pub matrix: Matrix,
    pub resolver: VersionResolver,
    pub graph: InstallGraph,
}

impl PipelineConfig {
    /// The pipeline the `init` command writes by default: three platforms, two
    /// runtime versions, one framework version, and the macOS 3.7 patch override.
    ///
    /// `init` 命令默认写入的流水线：三个平台、两个运行时版本、一个框架版本，
    /// 以及 macOS 3.7 的补丁版本覆盖。
    pub fn example() -> Self {
        Self {
            name: default_name(),
            trigger: TriggerPolicy::default(),
            matrix: MatrixConfig {
                axes: vec![
                    Axis::new("os", &["ubuntu-latest", "windows-latest", "macOS-latest"]),
                    Axis::new("runtime", &["3.7", "3.10"]),
                    Axis::new("framework", &["1.13.1"]),
                ],
                exclude: Vec::new(),
            },
            overrides: vec![OverrideRule {
                os: Some("macOS-latest".to_string()),
                runtime: Some("3.7".to_string()),
                framework: None,
                replacement: "3.7.16".to_string(),
                reason: Some("3.7.17 on macOS is missing the lzma module".to_string()),
            }],
            environment: EnvironmentConfig::default(),
            install: InstallConfig::default(),
            tests: TestsConfig::default(),
            coverage: CoverageConfig::default(),
            report: ReportConfig::default(),
        }
    }

    /// Checks every declaration and derives the matrix, resolver and install graph.
    /// 检查所有声明，并派生出矩阵、解析器和安装图。
    pub fn validate(self) -> Result<ValidatedPipeline, ConfigurationError> {
        let matrix = Matrix::new(&self.matrix)?;
        let resolver = VersionResolver::for_matrix(self.overrides.clone(), &matrix)?;
        let graph = InstallGraph::build(self.install.layers.clone())?;

        check_template(&self.environment.interpreter, INTERPRETER_PLACEHOLDERS)?;
        if !self.environment.create.trim().is_empty() {
            check_template(&self.environment.create, ENVIRONMENT_PLACEHOLDERS)?;
        }
        for command in &self.environment.inspect {
            check_template(command, INSTALL_PLACEHOLDERS)?;
        }
        check_template(&self.install.extension_index_url, INDEX_URL_PLACEHOLDERS)?;
        for layer in &self.install.layers {
            for command in &layer.commands {
                check_template(command, INSTALL_PLACEHOLDERS)?;
            }
        }
        check_template(&self.tests.command, TEST_PLACEHOLDERS)?;

        if self.tests.max_workers == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "tests.max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.tests.extensions.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "tests.extensions",
                message: "at least one file extension is required".to_string(),
            });
        }
        if self.report.attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "report.attempts",
                message: "must be at least 1".to_string(),
            });
        }

        // A missing compat entry only fails the jobs that need it, at install time.
        if graph.ordered().any(|l| l.native_against.is_some()) {
            if let Some(axis) = matrix.axis(AXIS_FRAMEWORK) {
                for version in axis.values.iter().filter(|v| !self.install.compat.contains_key(*v)) {
                    tracing::warn!(
                        framework = %version,
                        "no compatibility entry; jobs on this framework version will fail to install extensions"
                    );
                }
            }
        }

        Ok(ValidatedPipeline {
            config: self,
            matrix,
            resolver,
            graph,
        })
    }
}

fn check_template(template: &str, known: &[&str]) -> Result<(), ConfigurationError> {
    template::check(template, known).map_err(|e| match e {
        TemplateError::UnknownPlaceholder(placeholder) => ConfigurationError::UnknownPlaceholder {
            template: template.to_string(),
            placeholder,
        },
        other => ConfigurationError::InvalidTemplate {
            template: template.to_string(),
            message: other.to_string(),
        },
    })
}

/// Parses a pipeline declaration without validating it.
pub fn parse_pipeline(content: &str) -> Result<PipelineConfig, ConfigurationError> {
    toml::from_str(content).map_err(|e| ConfigurationError::Parse(e.to_string()))
}

/// Reads and parses a pipeline declaration from disk.
/// 从磁盘读取并解析流水线声明。
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_pipeline(&content)
}
