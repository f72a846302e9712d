//! # Plan Command Module / 计划命令模块
//!
//! Prints the resolved matrix without running anything. The JSON form is an
//! `include` list the hosting platform can feed to its own job matrix.
//!
//! 打印解析后的矩阵而不运行任何内容。JSON 形式是一个 `include` 列表，
//! 托管平台可以直接将其用作自己的作业矩阵。

use anyhow::Result;
use colored::*;
use serde_json::json;
use std::path::Path;

use crate::cli::TriggerArgs;
use crate::cli::commands::{has_trigger, load_validated, trigger_event};
use crate::core::models::{EXIT_SUCCESS, ResolvedJob};
use crate::core::pipeline::{self, Plan};

/// Executes the plan command.
///
/// Without any trigger (no `--event` and no `GITHUB_EVENT_NAME`) the whole
/// matrix is printed ungated.
///
/// 执行计划命令。如果没有任何触发信息，则不经过门禁直接打印整个矩阵。
pub fn execute(config: &Path, trigger: TriggerArgs, json_output: bool) -> Result<u8> {
    let validated = load_validated(config)?;

    let (event, plan) = if has_trigger(&trigger) {
        let event = trigger_event(trigger)?;
        let plan = pipeline::plan(&validated, &event);
        (Some(event), plan)
    } else {
        let jobs = validated.resolver.resolve_all(validated.matrix.jobs());
        (None, Plan::Jobs(jobs))
    };

    if json_output {
        let include: Vec<_> = plan.jobs().iter().map(job_json).collect();
        let document = json!({
            "name": validated.config.name,
            "event": event.as_ref().map(|e| e.to_string()),
            "skipped": matches!(plan, Plan::Skipped),
            "include": include,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(EXIT_SUCCESS);
    }

    if let Some(event) = &event {
        println!("{} {}", "Trigger:".bold(), event);
    }
    match &plan {
        Plan::Skipped => {
            println!("{}", "Trigger is not allow-listed, the matrix is skipped (0 jobs).".yellow());
        }
        Plan::Jobs(jobs) => {
            println!("{}", format!("{} jobs", jobs.len()).bold());
            for job in jobs {
                let runtime = match &job.applied {
                    Some(applied) => format!(
                        "{} -> {}{}",
                        job.spec.runtime_version,
                        job.effective_runtime,
                        applied
                            .reason
                            .as_deref()
                            .map(|r| format!(" ({r})"))
                            .unwrap_or_default()
                    )
                    .yellow(),
                    None => job.effective_runtime.normal(),
                };
                println!(
                    "  #{:<3} {:<18} runtime {:<24} framework {}",
                    job.spec.number, job.spec.os, runtime, job.spec.framework_version
                );
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

fn job_json(job: &ResolvedJob) -> serde_json::Value {
    json!({
        "number": job.spec.number,
        "slug": job.slug(),
        "os": job.spec.os,
        "runtime": job.spec.runtime_version,
        "effective_runtime": job.effective_runtime,
        "framework": job.spec.framework_version,
        "override": job.applied.as_ref().map(|a| a.rule),
    })
}
