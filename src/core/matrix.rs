//! # Matrix Expansion Module / 矩阵展开模块
//!
//! Expands the declared axes into the cartesian set of jobs. Expansion never
//! filters; the only way to drop a point is an explicit exclude entry declared
//! next to the axes. Override rules change versions, they never remove jobs.
//!
//! 将声明的各个轴展开为作业的笛卡尔积。展开本身从不过滤；
//! 去掉某个点的唯一方式是在轴旁边显式声明排除项。覆盖规则只修改版本，从不删除作业。

use crate::core::error::ConfigurationError;
use crate::core::models::JobSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const AXIS_OS: &str = "os";
pub const AXIS_RUNTIME: &str = "runtime";
pub const AXIS_FRAMEWORK: &str = "framework";

/// A named dimension with an ordered list of allowed values.
/// 一个有名字的维度，带有有序的取值列表。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// The `[matrix]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatrixConfig {
    pub axes: Vec<Axis>,
    /// Each entry maps axis names to values; a job matching every pair is dropped.
    /// 每个条目将轴名映射到取值；匹配所有键值对的作业会被去掉。
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, String>>,
}

/// Expands arbitrary axes into every combination of their values.
/// Each point lists one value per axis, in axis order. The first axis varies
/// slowest, so the order is stable for a given declaration.
///
/// 将任意轴展开为其取值的所有组合。每个点按轴的顺序为每个轴列出一个取值。
/// 第一个轴变化最慢，因此对于给定的声明，顺序是稳定的。
pub fn cartesian(axes: &[Axis]) -> Result<Vec<Vec<&str>>, ConfigurationError> {
    if axes.is_empty() {
        return Err(ConfigurationError::EmptyMatrix);
    }

    let mut names = HashSet::new();
    for axis in axes {
        if !names.insert(axis.name.as_str()) {
            return Err(ConfigurationError::DuplicateAxis(axis.name.clone()));
        }
        if axis.values.is_empty() {
            return Err(ConfigurationError::EmptyAxis(axis.name.clone()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = axis.values.iter().find(|v| !seen.insert(v.as_str())) {
            return Err(ConfigurationError::DuplicateAxisValue {
                axis: axis.name.clone(),
                value: dup.clone(),
            });
        }
    }

    let total: usize = axes.iter().map(|a| a.values.len()).product();
    let mut points = Vec::with_capacity(total);
    for index in 0..total {
        let mut remainder = index;
        let mut point = vec![""; axes.len()];
        for (slot, axis) in axes.iter().enumerate().rev() {
            let len = axis.values.len();
            point[slot] = axis.values[remainder % len].as_str();
            remainder /= len;
        }
        points.push(point);
    }
    Ok(points)
}

/// The validated job matrix.
/// 经过校验的作业矩阵。
#[derive(Debug, Clone)]
pub struct Matrix {
    axes: Vec<Axis>,
    jobs: Vec<JobSpec>,
}

impl Matrix {
    pub fn new(config: &MatrixConfig) -> Result<Self, ConfigurationError> {
        let points = cartesian(&config.axes)?;

        if let Some(unknown) = config
            .axes
            .iter()
            .find(|a| ![AXIS_OS, AXIS_RUNTIME, AXIS_FRAMEWORK].contains(&a.name.as_str()))
        {
            return Err(ConfigurationError::UnknownAxis(unknown.name.clone()));
        }
        let position = |name: &'static str| {
            config
                .axes
                .iter()
                .position(|a| a.name == name)
                .ok_or(ConfigurationError::MissingAxis(name))
        };
        let (os_at, runtime_at, framework_at) =
            (position(AXIS_OS)?, position(AXIS_RUNTIME)?, position(AXIS_FRAMEWORK)?);

        for (index, exclude) in config.exclude.iter().enumerate() {
            for (axis, value) in exclude {
                let known = config
                    .axes
                    .iter()
                    .any(|a| a.name == *axis && a.contains(value));
                if !known {
                    return Err(ConfigurationError::UnknownExcludeTarget {
                        index,
                        axis: axis.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        let is_excluded = |point: &[&str]| {
            config.exclude.iter().any(|exclude| {
                exclude.iter().all(|(axis, value)| {
                    config
                        .axes
                        .iter()
                        .position(|a| a.name == *axis)
                        .is_some_and(|at| point[at] == value.as_str())
                })
            })
        };

        let jobs: Vec<JobSpec> = points
            .iter()
            .filter(|point| !is_excluded(point.as_slice()))
            .enumerate()
            .map(|(i, point)| {
                JobSpec::new(i + 1, point[os_at], point[runtime_at], point[framework_at])
            })
            .collect();

        if jobs.is_empty() {
            return Err(ConfigurationError::EverythingExcluded);
        }

        let mut slugs: BTreeMap<String, usize> = BTreeMap::new();
        for job in &jobs {
            if let Some(first) = slugs.insert(job.slug(), job.number) {
                return Err(ConfigurationError::DuplicateJobSlug {
                    slug: job.slug(),
                    first,
                    second: job.number,
                });
            }
        }

        Ok(Self {
            axes: config.axes.clone(),
            jobs,
        })
    }

    /// The expanded jobs, in stable order.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }
}
