//! # HTML Reporting Module / HTML 报告模块
//!
//! Renders the matrix as a standalone HTML page: summary counters, one row
//! per job, and collapsible install and test details for failed jobs.
//!
//! 将矩阵渲染为一个独立的 HTML 页面：汇总计数、每个作业一行，
//! 以及失败作业可折叠的安装和测试详情。

use anyhow::{Context, Result};
use maud::{DOCTYPE, Markup, html};
use std::fs;
use std::path::Path;

use crate::core::models::JobOutcome;
use crate::core::pipeline::JobReport;

const HTML_STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", sans-serif; margin: 2rem; color: #222; }
.summary-container { display: flex; gap: 1.5rem; margin-bottom: 1.5rem; }
.summary-item { display: flex; flex-direction: column; align-items: center; }
.count { font-size: 1.8rem; font-weight: bold; }
.passed-text { color: #2e7d32; } .failed-text { color: #c62828; }
.environment-text { color: #6a1b9a; } .cancelled-text { color: #757575; }
table { border-collapse: collapse; width: 100%; }
th, td { border-bottom: 1px solid #ddd; padding: .4rem .6rem; text-align: left; }
.status-cell { display: inline-block; padding: .1rem .5rem; border-radius: .3rem; color: #fff; }
.status-passed { background: #2e7d32; } .status-test-failure { background: #c62828; }
.status-environment-failure { background: #6a1b9a; } .status-cancelled { background: #757575; }
.output-toggle { cursor: pointer; color: #1565c0; font-size: .85rem; }
.output-content { background: #f5f5f5; padding: .6rem; white-space: pre-wrap; }
"#;

const HTML_SCRIPT: &str = r#"
function toggleOutput(id) {
  var row = document.getElementById(id);
  row.style.display = row.style.display === 'none' ? 'table-row' : 'none';
}
"#;

fn status_class(outcome: &JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Passed => "status-passed",
        JobOutcome::TestFailure { .. } => "status-test-failure",
        JobOutcome::EnvironmentFailure { .. } => "status-environment-failure",
        JobOutcome::Cancelled => "status-cancelled",
    }
}

/// Text shown in the collapsible details row of a failed job.
fn failure_details(report: &JobReport) -> String {
    let mut details = String::new();
    match &report.outcome {
        JobOutcome::EnvironmentFailure { stage, message } => {
            details.push_str(&format!("stage: {stage}\n{message}\n"));
            if let Some(output) = report.install_error.as_ref().and_then(|e| e.output()) {
                details.push('\n');
                details.push_str(output);
            }
        }
        JobOutcome::TestFailure { .. } => {
            for group in report.tests.iter().flat_map(|t| &t.groups).filter(|g| g.failed()) {
                details.push_str(&format!("== group {} ({}) ==\n", group.name, group.state));
                for case in group.failed_cases() {
                    details.push_str(&format!("FAILED {}\n", case.id));
                }
                details.push('\n');
                details.push_str(&group.output);
                details.push('\n');
            }
        }
        JobOutcome::Passed | JobOutcome::Cancelled => {}
    }
    details
}

/// Builds the report page.
/// 构建报告页面。
pub fn render_html_report(reports: &[JobReport]) -> Markup {
    let count = |f: fn(&JobOutcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();
    let passed = count(|o| matches!(o, JobOutcome::Passed));
    let test_failures = count(|o| matches!(o, JobOutcome::TestFailure { .. }));
    let environment_failures = count(|o| matches!(o, JobOutcome::EnvironmentFailure { .. }));
    let cancelled = count(|o| matches!(o, JobOutcome::Cancelled));

    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Test Matrix Report" }
                style { (maud::PreEscaped(HTML_STYLE)) }
            }
            body {
                h1 { "Test Matrix Report" }
                div class="summary-container" {
                    div class="summary-item" { span class="count" { (reports.len()) } span class="label" { "Total" } }
                    div class="summary-item" { span class="count passed-text" { (passed) } span class="label" { "Passed" } }
                    div class="summary-item" { span class="count failed-text" { (test_failures) } span class="label" { "Test Failures" } }
                    div class="summary-item" { span class="count environment-text" { (environment_failures) } span class="label" { "Environment Failures" } }
                    div class="summary-item" { span class="count cancelled-text" { (cancelled) } span class="label" { "Cancelled" } }
                }
                table {
                    thead {
                        tr {
                            th { "#" }
                            th { "OS" }
                            th { "Runtime" }
                            th { "Framework" }
                            th { "Status" }
                            th { "Coverage" }
                            th { "Submission" }
                            th { "Duration" }
                        }
                    }
                    tbody {
                        @for report in reports {
                            @let output_id = format!("output-{}", report.job.spec.number);
                            @let failed = !report.outcome.is_success() && !matches!(report.outcome, JobOutcome::Cancelled);
                            tr {
                                td { (report.job.spec.number) }
                                td { (report.job.spec.os) }
                                td {
                                    (report.job.effective_runtime)
                                    @if report.job.applied.is_some() {
                                        " (declared " (report.job.spec.runtime_version) ")"
                                    }
                                }
                                td { (report.job.spec.framework_version) }
                                td {
                                    div class={ "status-cell " (status_class(&report.outcome)) } { (report.outcome.label()) }
                                    @if failed {
                                        div class="output-toggle" onclick={ "toggleOutput('" (output_id) "')" } { "Show details" }
                                    }
                                }
                                td {
                                    @if let Some(coverage) = report.coverage {
                                        (format!("{:.1}%", coverage.percent()))
                                    }
                                }
                                td {
                                    @if let Some(submission) = &report.submission {
                                        (submission.label())
                                    }
                                }
                                td { (format!("{:.2}s", report.duration.as_secs_f64())) }
                            }
                            @if failed {
                                tr id=(output_id) style="display:none;" {
                                    td colspan="8" { pre class="output-content" { (failure_details(report)) } }
                                }
                            }
                        }
                    }
                }
                script { (maud::PreEscaped(HTML_SCRIPT)) }
            }
        }
    }
}

/// Writes the HTML report to `output_path`.
/// 将 HTML 报告写入 `output_path`。
pub fn generate_html_report(reports: &[JobReport], output_path: &Path) -> Result<()> {
    let page = render_html_report(reports);
    fs::write(output_path, page.into_string())
        .with_context(|| format!("Failed to write HTML report: {}", output_path.display()))?;
    Ok(())
}
