//! # Dependency Installer Module / 依赖安装模块
//!
//! Installs a job's dependency layers into its isolated environment. Layers
//! form an explicit dependency graph: a layer that compiles native code
//! against another package must depend on that package's layer and on the
//! smoke check that verifies it. [`InstallGraph`] checks this when the config
//! loads; [`InstallSession`] refuses at run time to execute a layer whose
//! prerequisites have not completed.
//!
//! 将作业的依赖层安装到其隔离环境中。各层构成显式的依赖图：
//! 针对另一个包编译原生代码的层，必须依赖该包所在的层以及验证它的冒烟检查层。
//! [`InstallGraph`] 在加载配置时检查这一点；[`InstallSession`] 在运行时拒绝执行
//! 前置条件尚未完成的层。

use crate::core::config::{EnvironmentConfig, InstallConfig};
use crate::core::error::{ConfigurationError, EnvironmentError};
use crate::core::models::ResolvedJob;
use crate::infra::command::{ExitState, Invocation, ProcessRunner};
use crate::infra::fs::venv_python;
use crate::infra::template::{self, TemplateVars};
use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One `[[install.layers]]` entry.
/// 一个 `[[install.layers]]` 条目。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayerConfig {
    pub name: String,
    /// Command templates, run in order. The first failure aborts the layer.
    /// 命令模板，按顺序执行。第一个失败会中止该层。
    pub commands: Vec<String>,
    /// Layers that must have completed before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// The layer whose headers/ABI this layer's native builds compile against.
    /// Its packages are pinned from the compatibility table.
    ///
    /// 该层原生构建所依赖的头文件/ABI 所在的层。其包版本从兼容性表中固定。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_against: Option<String>,
    /// Marks this layer as the smoke check of the named layer: the last output
    /// line must report the job's framework version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl LayerConfig {
    pub fn new(name: &str, commands: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            requires: Vec::new(),
            native_against: None,
            verifies: None,
            timeout_secs: None,
        }
    }

    pub fn requires(mut self, layers: &[&str]) -> Self {
        self.requires = layers.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn native_against(mut self, layer: &str) -> Self {
        self.native_against = Some(layer.to_string());
        self
    }

    pub fn verifies(mut self, layer: &str) -> Self {
        self.verifies = Some(layer.to_string());
        self
    }

    /// Names this layer cannot start without.
    fn prerequisites(&self) -> impl Iterator<Item = &str> {
        self.requires
            .iter()
            .map(String::as_str)
            .chain(self.native_against.as_deref())
            .chain(self.verifies.as_deref())
    }
}

/// The five layers of a CPU-only framework install.
/// CPU 版框架安装的五个默认层。
pub fn default_layers() -> Vec<LayerConfig> {
    vec![
        LayerConfig::new(
            "foundation",
            &[
                "{python} -m pip install --upgrade pip",
                "{python} -m pip install torch=={framework} -f {cpu_index_url}",
            ],
        ),
        LayerConfig::new(
            "smoke",
            &["{python} -c \"import torch; print(torch.__version__)\""],
        )
        .requires(&["foundation"])
        .verifies("foundation"),
        LayerConfig::new("requirements", &["{python} -m pip install -r {requirements}"])
            .requires(&["smoke"]),
        LayerConfig::new(
            "extensions",
            &["{python} -m pip install {extensions} -f {extension_index_url}"],
        )
        .requires(&["smoke"])
        .native_against("foundation"),
        LayerConfig::new("package", &["{python} -m pip install -e \".[dev]\""])
            .requires(&["requirements", "extensions"]),
    ]
}

/// Validated install layers in execution order.
/// 校验过的安装层，按执行顺序排列。
#[derive(Debug, Clone)]
pub struct InstallGraph {
    layers: Vec<LayerConfig>,
    order: Vec<usize>,
}

impl InstallGraph {
    pub fn build(layers: Vec<LayerConfig>) -> Result<Self, ConfigurationError> {
        let mut index = BTreeMap::new();
        for (i, layer) in layers.iter().enumerate() {
            if index.insert(layer.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateLayer(layer.name.clone()));
            }
            if layer.commands.is_empty() {
                return Err(ConfigurationError::EmptyLayer(layer.name.clone()));
            }
        }
        for layer in &layers {
            if let Some(missing) = layer.prerequisites().find(|p| !index.contains_key(*p)) {
                return Err(ConfigurationError::UnknownLayer {
                    layer: layer.name.clone(),
                    missing: missing.to_string(),
                });
            }
        }

        let order = topological_order(&layers, &index)?;
        let graph = Self { layers, order };

        for layer in &graph.layers {
            if let Some(against) = &layer.native_against {
                let ancestors = graph.ancestors(&layer.name);
                let verifiers = graph
                    .layers
                    .iter()
                    .filter(|l| l.verifies.as_deref() == Some(against.as_str()))
                    .map(|l| l.name.as_str());
                if let Some(missing) = std::iter::once(against.as_str())
                    .chain(verifiers)
                    .find(|needed| !ancestors.contains(*needed))
                {
                    return Err(ConfigurationError::NativeWithoutDependency {
                        layer: layer.name.clone(),
                        against: against.clone(),
                        missing: missing.to_string(),
                    });
                }
            }
            if let Some(target) = &layer.verifies {
                if !graph.ancestors(&layer.name).contains(target.as_str()) {
                    return Err(ConfigurationError::NativeWithoutDependency {
                        layer: layer.name.clone(),
                        against: target.clone(),
                        missing: target.clone(),
                    });
                }
            }
        }

        Ok(graph)
    }

    /// Layers in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &LayerConfig> {
        self.order.iter().map(|&i| &self.layers[i])
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Every layer `name` transitively waits for.
    /// `name` 传递性等待的所有层。
    pub fn ancestors(&self, name: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<&str> = self
            .layer(name)
            .map(|l| l.prerequisites().collect())
            .unwrap_or_default();
        while let Some(next) = pending.pop() {
            if seen.insert(next) {
                if let Some(layer) = self.layer(next) {
                    pending.extend(layer.prerequisites());
                }
            }
        }
        seen
    }
}

/// Kahn's algorithm with declaration order as the tie-break.
fn topological_order(
    layers: &[LayerConfig],
    index: &BTreeMap<String, usize>,
) -> Result<Vec<usize>, ConfigurationError> {
    let deps: Vec<BTreeSet<usize>> = layers
        .iter()
        .map(|l| l.prerequisites().filter_map(|p| index.get(p).copied()).collect())
        .collect();

    let mut done = vec![false; layers.len()];
    let mut order = Vec::with_capacity(layers.len());
    while order.len() < layers.len() {
        let ready = (0..layers.len()).find(|&i| !done[i] && deps[i].iter().all(|&d| done[d]));
        match ready {
            Some(i) => {
                done[i] = true;
                order.push(i);
            }
            None => {
                // Every remaining layer waits on another remaining layer; walk
                // the waits until one repeats to name the cycle.
                let mut path = Vec::new();
                let mut at = (0..layers.len()).find(|&i| !done[i]).unwrap_or_default();
                while !path.contains(&at) {
                    path.push(at);
                    at = deps[at].iter().copied().find(|&d| !done[d]).unwrap_or(at);
                }
                let start = path.iter().position(|&i| i == at).unwrap_or_default();
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&i| layers[i].name.clone()).collect();
                cycle.push(layers[at].name.clone());
                return Err(ConfigurationError::DependencyCycle(cycle));
            }
        }
    }
    Ok(order)
}

/// What one completed layer did.
/// 一个已完成层的执行记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRecord {
    pub name: String,
    pub commands: Vec<String>,
    pub output: String,
    pub duration: Duration,
}

/// The environment tests run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledEnvironment {
    /// `None` when provisioning is disabled and the interpreter is used directly.
    pub env_dir: Option<PathBuf>,
    pub python: PathBuf,
    /// Version printed by the smoke check.
    pub framework_reported: Option<String>,
    /// Where the environment inspection was written, if it succeeded.
    pub inspection: Option<PathBuf>,
}

/// Result of installing one job: the layers that completed, and either the
/// environment or the error that aborted the job.
///
/// 安装一个作业的结果：已完成的层，以及安装好的环境或中止作业的错误。
#[derive(Debug)]
pub struct InstallResult {
    pub records: Vec<LayerRecord>,
    pub outcome: Result<InstalledEnvironment, EnvironmentError>,
}

/// Tracks completed layers for one job and enforces their preconditions.
/// 跟踪单个作业已完成的层，并强制检查其前置条件。
pub struct InstallSession<'a> {
    runner: &'a dyn ProcessRunner,
    cwd: PathBuf,
    vars: TemplateVars,
    framework: String,
    compat: Option<&'a BTreeMap<String, String>>,
    default_timeout: Option<Duration>,
    completed: Vec<String>,
    records: Vec<LayerRecord>,
    framework_reported: Option<String>,
}

impl<'a> InstallSession<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        cwd: PathBuf,
        vars: TemplateVars,
        framework: impl Into<String>,
        compat: Option<&'a BTreeMap<String, String>>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            cwd,
            vars,
            framework: framework.into(),
            compat,
            default_timeout,
            completed: Vec::new(),
            records: Vec::new(),
            framework_reported: None,
        }
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn framework_reported(&self) -> Option<&str> {
        self.framework_reported.as_deref()
    }

    pub fn into_records(self) -> Vec<LayerRecord> {
        self.records
    }

    /// Runs one layer. Fails without running anything if a prerequisite has not completed.
    /// 执行一个层。如果有前置条件尚未完成，则不执行任何命令直接失败。
    pub async fn execute(&mut self, layer: &LayerConfig) -> Result<(), EnvironmentError> {
        let mut missing: Vec<String> = Vec::new();
        for prerequisite in layer.prerequisites() {
            let done = self.completed.iter().any(|c| c == prerequisite);
            if !done && !missing.iter().any(|m| m == prerequisite) {
                missing.push(prerequisite.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(EnvironmentError::PreconditionViolation {
                layer: layer.name.clone(),
                missing,
            });
        }

        let mut vars = self.vars.clone();
        if layer.native_against.is_some() {
            // An empty table pins nothing, which is as unusable as no table.
            let pins = self.compat.filter(|pins| !pins.is_empty()).ok_or_else(|| {
                EnvironmentError::MissingCompat {
                    layer: layer.name.clone(),
                    framework: self.framework.clone(),
                }
            })?;
            vars.set_many("extensions", pin_specs(pins));
        }

        let timeout = layer
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.default_timeout);
        let start = Instant::now();
        let mut commands = Vec::with_capacity(layer.commands.len());
        let mut output = String::new();
        let mut last_output = String::new();

        println!("{}", format!("  -> installing layer '{}'", layer.name).blue());

        for command in &layer.commands {
            let argv = template::render_command(command, &vars).map_err(|e| {
                EnvironmentError::Template {
                    layer: layer.name.clone(),
                    message: e.to_string(),
                }
            })?;
            let Some(invocation) = Invocation::from_argv(&layer.name, argv, self.cwd.clone()) else {
                continue;
            };
            let invocation = invocation.with_timeout(timeout);
            let command_line = invocation.command_line();
            tracing::info!(layer = %layer.name, command = %command_line, "running install command");

            let result = self.runner.run(&invocation).await.map_err(|e| EnvironmentError::Spawn {
                layer: layer.name.clone(),
                command: command_line.clone(),
                message: e.to_string(),
            })?;
            output.push_str(&format!("$ {command_line}\n{}", result.output));
            commands.push(command_line.clone());

            match result.state {
                ExitState::Exited(0) => last_output = result.output,
                ExitState::TimedOut => {
                    return Err(EnvironmentError::Timeout {
                        layer: layer.name.clone(),
                        secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    });
                }
                state => {
                    return Err(EnvironmentError::LayerFailed {
                        layer: layer.name.clone(),
                        command: command_line,
                        exit: state.to_string(),
                        output,
                    });
                }
            }
        }

        if layer.verifies.is_some() {
            let reported = last_output
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string();
            if !version_matches(&self.framework, &reported) {
                return Err(EnvironmentError::SmokeCheck {
                    layer: layer.name.clone(),
                    expected: self.framework.clone(),
                    reported,
                });
            }
            println!(
                "{}",
                format!("  -> smoke check passed: framework reports {reported}").green()
            );
            self.framework_reported = Some(reported);
        }

        self.completed.push(layer.name.clone());
        self.records.push(LayerRecord {
            name: layer.name.clone(),
            commands,
            output,
            duration: start.elapsed(),
        });
        Ok(())
    }
}

/// `name==version` specifiers from a compatibility-table entry, sorted by name.
pub fn pin_specs(pins: &BTreeMap<String, String>) -> Vec<String> {
    pins.iter()
        .map(|(name, version)| format!("{name}=={version}"))
        .collect()
}

/// A reported version matches when it equals the expected one, optionally
/// followed by a `+local` build tag such as `+cpu`.
///
/// 当报告的版本与期望版本相等（可以带有 `+cpu` 这样的本地构建标签）时视为匹配。
pub fn version_matches(expected: &str, reported: &str) -> bool {
    reported == expected
        || reported
            .strip_prefix(expected)
            .is_some_and(|rest| rest.starts_with('+'))
}

/// Installs jobs according to the `[environment]` and `[install]` tables.
pub struct Installer<'a> {
    pub environment: &'a EnvironmentConfig,
    pub install: &'a InstallConfig,
    pub graph: &'a InstallGraph,
    pub runner: &'a dyn ProcessRunner,
}

impl Installer<'_> {
    /// Placeholder bindings shared by every layer of a job.
    pub fn layer_vars(
        &self,
        job: &ResolvedJob,
        project_dir: &Path,
        env_dir: Option<&Path>,
        python: &Path,
    ) -> Result<TemplateVars, EnvironmentError> {
        let mut url_vars = TemplateVars::new();
        url_vars
            .set("framework", job.spec.framework_version.clone())
            .set("runtime", job.effective_runtime.clone())
            .set("runtime_minor", job.runtime_minor());
        let extension_index_url = template::render_str(&self.install.extension_index_url, &url_vars)
            .map_err(|e| EnvironmentError::Template {
                layer: "extensions".to_string(),
                message: e.to_string(),
            })?;

        let mut vars = url_vars;
        vars.set("python", python.display().to_string())
            .set("requirements", self.install.requirements.clone())
            .set("cpu_index_url", self.install.cpu_index_url.clone())
            .set("extension_index_url", extension_index_url)
            .set("project_dir", project_dir.display().to_string())
            .set("job", job.slug())
            .set(
                "env_dir",
                env_dir.map(|p| p.display().to_string()).unwrap_or_default(),
            );
        if let Some(pins) = self.install.compat.get(&job.spec.framework_version) {
            vars.set_many("extensions", pin_specs(pins));
        }
        Ok(vars)
    }

    /// Creates the job's isolated environment and returns `(env_dir, python)`.
    /// 创建作业的隔离环境，返回 `(env_dir, python)`。
    async fn provision(
        &self,
        job: &ResolvedJob,
        project_dir: &Path,
        job_dir: &Path,
    ) -> Result<(Option<PathBuf>, PathBuf), EnvironmentError> {
        let mut vars = TemplateVars::new();
        vars.set("runtime", job.effective_runtime.clone())
            .set("runtime_minor", job.runtime_minor())
            .set("framework", job.spec.framework_version.clone())
            .set("project_dir", project_dir.display().to_string())
            .set("job", job.slug());
        let interpreter = template::render_str(&self.environment.interpreter, &vars).map_err(|e| {
            EnvironmentError::Template {
                layer: "environment".to_string(),
                message: e.to_string(),
            }
        })?;

        if self.environment.create.trim().is_empty() {
            return Ok((None, PathBuf::from(interpreter)));
        }

        let env_dir = job_dir.join("venv");
        let provision_error = |message: String| EnvironmentError::Provision {
            path: env_dir.clone(),
            message,
        };
        if env_dir.exists() {
            std::fs::remove_dir_all(&env_dir).map_err(|e| provision_error(e.to_string()))?;
        }

        vars.set("interpreter", interpreter)
            .set("env_dir", env_dir.display().to_string());
        let argv = template::render_command(&self.environment.create, &vars)
            .map_err(|e| provision_error(e.to_string()))?;
        let invocation = Invocation::from_argv("environment", argv, project_dir.to_path_buf())
            .ok_or_else(|| provision_error("empty create command".to_string()))?;

        println!(
            "{}",
            format!("  -> provisioning environment with `{}`", invocation.command_line()).blue()
        );
        let result = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| provision_error(e.to_string()))?;
        if !result.success() {
            return Err(provision_error(format!(
                "`{}` ended with {}\n{}",
                invocation.command_line(),
                result.state,
                result.output
            )));
        }

        let python = venv_python(&env_dir);
        Ok((Some(env_dir), python))
    }

    /// Provisions the environment and runs every layer in graph order.
    /// Stops at the first failure; layers are never retried.
    ///
    /// 创建环境并按图的顺序执行每一层。遇到第一个失败即停止；层永远不会重试。
    pub async fn install(&self, job: &ResolvedJob, project_dir: &Path, job_dir: &Path) -> InstallResult {
        let (env_dir, python) = match self.provision(job, project_dir, job_dir).await {
            Ok(paths) => paths,
            Err(error) => {
                return InstallResult {
                    records: Vec::new(),
                    outcome: Err(error),
                };
            }
        };

        let vars = match self.layer_vars(job, project_dir, env_dir.as_deref(), &python) {
            Ok(vars) => vars,
            Err(error) => {
                return InstallResult {
                    records: Vec::new(),
                    outcome: Err(error),
                };
            }
        };

        let mut session = InstallSession::new(
            self.runner,
            project_dir.to_path_buf(),
            vars.clone(),
            job.spec.framework_version.clone(),
            self.install.compat.get(&job.spec.framework_version),
            Some(Duration::from_secs(self.install.timeout_secs)).filter(|d| !d.is_zero()),
        );

        for layer in self.graph.ordered() {
            if let Err(error) = session.execute(layer).await {
                tracing::warn!(job = %job.slug(), layer = %layer.name, error = %error, "install layer failed");
                return InstallResult {
                    records: session.into_records(),
                    outcome: Err(error),
                };
            }
        }

        let framework_reported = session.framework_reported().map(str::to_string);
        let inspection = self.inspect(&vars, project_dir, job_dir).await;

        InstallResult {
            records: session.into_records(),
            outcome: Ok(InstalledEnvironment {
                env_dir,
                python,
                framework_reported,
                inspection,
            }),
        }
    }

    /// Records the installed environment (e.g. `pip list`) to `environment.txt`.
    /// Failures are logged and ignored.
    async fn inspect(&self, vars: &TemplateVars, project_dir: &Path, job_dir: &Path) -> Option<PathBuf> {
        if self.environment.inspect.is_empty() {
            return None;
        }
        let mut report = String::new();
        for command in &self.environment.inspect {
            let rendered = template::render_command(command, vars)
                .map_err(|e| e.to_string())
                .and_then(|argv| {
                    Invocation::from_argv("inspect", argv, project_dir.to_path_buf())
                        .ok_or_else(|| "the command renders empty".to_string())
                });
            let invocation = match rendered {
                Ok(invocation) => invocation,
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "skipping environment inspection");
                    continue;
                }
            };
            match self.runner.run(&invocation).await {
                Ok(result) => {
                    report.push_str(&format!("$ {}\n{}\n", invocation.command_line(), result.output));
                }
                Err(e) => {
                    tracing::warn!(command = %invocation.command_line(), error = %e, "environment inspection failed");
                }
            }
        }

        let path = job_dir.join("environment.txt");
        match std::fs::write(&path, report) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write environment inspection");
                None
            }
        }
    }
}
