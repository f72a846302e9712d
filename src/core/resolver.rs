//! # Version Resolver Module / 版本解析模块
//!
//! Applies conditional runtime-version overrides for known-broken
//! combinations, e.g. a patch release missing a standard-library module on one
//! operating system. Rules are evaluated in declaration order and the first
//! match wins. Resolution is pure and total: unmatched jobs pass through.
//!
//! 针对已知有问题的组合应用条件性的运行时版本覆盖，例如某个补丁版本在某个操作系统上
//! 缺少标准库模块。规则按声明顺序求值，第一个匹配的规则生效。
//! 解析是纯函数且全定义的：未匹配的作业原样通过。

use crate::core::error::ConfigurationError;
use crate::core::matrix::{AXIS_FRAMEWORK, AXIS_OS, AXIS_RUNTIME, Matrix};
use crate::core::models::{AppliedOverride, JobSpec, ResolvedJob};
use serde::{Deserialize, Serialize};

/// One `[[overrides]]` entry. Every condition that is set must hold.
/// 一个 `[[overrides]]` 条目。所有已设置的条件都必须成立。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverrideRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// The effective runtime version for matching jobs.
    /// 匹配作业的实际运行时版本。
    pub replacement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OverrideRule {
    pub fn matches(&self, job: &JobSpec) -> bool {
        let holds = |condition: &Option<String>, actual: &str| {
            condition.as_deref().is_none_or(|expected| expected == actual)
        };
        holds(&self.os, &job.os)
            && holds(&self.runtime, &job.runtime_version)
            && holds(&self.framework, &job.framework_version)
    }

    fn conditions(&self) -> [(&'static str, Option<&str>); 3] {
        [
            (AXIS_OS, self.os.as_deref()),
            (AXIS_RUNTIME, self.runtime.as_deref()),
            (AXIS_FRAMEWORK, self.framework.as_deref()),
        ]
    }
}

/// Ordered override table.
#[derive(Debug, Clone, Default)]
pub struct VersionResolver {
    rules: Vec<OverrideRule>,
}

impl VersionResolver {
    /// Builds a resolver without checking the rules against a matrix.
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    /// Builds a resolver, rejecting rules that could never be intended:
    /// rules with no condition, and conditions naming undeclared axis values.
    ///
    /// 构建解析器，拒绝不可能是有意为之的规则：没有任何条件的规则，
    /// 以及条件中引用了未声明轴取值的规则。
    pub fn for_matrix(rules: Vec<OverrideRule>, matrix: &Matrix) -> Result<Self, ConfigurationError> {
        for (index, rule) in rules.iter().enumerate() {
            let conditions = rule.conditions();
            if conditions.iter().all(|(_, value)| value.is_none()) {
                return Err(ConfigurationError::EmptyOverridePredicate(index));
            }
            for (axis, value) in conditions {
                let Some(value) = value else { continue };
                let declared = matrix.axis(axis).is_some_and(|a| a.contains(value));
                if !declared {
                    return Err(ConfigurationError::UnknownOverrideTarget {
                        index,
                        axis,
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    /// Resolves the effective runtime version of a job.
    /// 解析作业的实际运行时版本。
    pub fn resolve(&self, job: &JobSpec) -> ResolvedJob {
        match self.rules.iter().enumerate().find(|(_, rule)| rule.matches(job)) {
            Some((index, rule)) => ResolvedJob {
                spec: job.clone(),
                effective_runtime: rule.replacement.clone(),
                applied: Some(AppliedOverride {
                    rule: index,
                    reason: rule.reason.clone(),
                }),
            },
            None => ResolvedJob {
                spec: job.clone(),
                effective_runtime: job.runtime_version.clone(),
                applied: None,
            },
        }
    }

    pub fn resolve_all(&self, jobs: &[JobSpec]) -> Vec<ResolvedJob> {
        jobs.iter().map(|job| self.resolve(job)).collect()
    }
}
