//! # Console Reporting Module / 控制台报告模块
//!
//! Colored end-of-run summary: one line per job, then the details of every
//! job that did not pass.
//!
//! 运行结束时的彩色摘要：每个作业一行，然后是每个未通过作业的详细信息。

use crate::core::models::JobOutcome;
use crate::core::pipeline::JobReport;
use crate::reporting::submit::SubmissionStatus;
use colored::*;

/// Prints one line per job.
///
/// ```text
/// --- Matrix Summary ---
///   - Passed              | #1 ubuntu-latest-3.10-1.13.1         |   84.20s | cov  71.3% | submitted
///   - Test Failure        | #2 windows-latest-3.10-1.13.1        |   91.02s | cov  70.8% | failed
///   - Environment Failure | #3 macOS-latest-3.7-1.13.1           |   12.40s |            |
/// ```
///
/// 每个作业打印一行。
pub fn print_summary(reports: &[JobReport]) {
    println!("\n{}", "--- Matrix Summary ---".bold());

    for report in reports {
        let label = report.outcome.label();
        let status = match report.outcome {
            JobOutcome::Passed => label.green(),
            JobOutcome::TestFailure { .. } => label.red(),
            JobOutcome::EnvironmentFailure { .. } => label.magenta(),
            JobOutcome::Cancelled => label.dimmed(),
        };
        let coverage = report
            .coverage
            .map(|c| format!("cov {:>5.1}%", c.percent()))
            .unwrap_or_default();
        let submission = match &report.submission {
            Some(SubmissionStatus::Submitted { .. }) => "submitted".green(),
            Some(SubmissionStatus::Failed { .. }) => "submit failed".yellow(),
            Some(SubmissionStatus::Disabled) => "not submitted".dimmed(),
            None => "".normal(),
        };

        println!(
            "  - {:<19} | #{:<2} {:<34} | {:>8.2}s | {:<10} | {}",
            status,
            report.job.spec.number,
            report.job.slug(),
            report.duration.as_secs_f64(),
            coverage,
            submission
        );
    }
}

/// Prints what went wrong in every job that did not pass.
/// 打印每个未通过作业的出错信息。
pub fn print_failure_details(reports: &[JobReport]) {
    let failures: Vec<&JobReport> = reports
        .iter()
        .filter(|r| !r.outcome.is_success())
        .collect();
    if failures.is_empty() {
        return;
    }

    println!("\n{}", "--- Failure Details ---".red().bold());
    println!("{}", "-".repeat(80));

    for (i, report) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}'",
            i + 1,
            failures.len(),
            report.outcome.label().red(),
            report.job.slug().cyan()
        );

        match &report.outcome {
            JobOutcome::EnvironmentFailure { stage, message } => {
                println!("  stage: {}", stage.yellow());
                println!("  {message}");
                if let Some(output) = report.install_error.as_ref().and_then(|e| e.output()) {
                    println!("\n--- {} ---\n", "install log".yellow());
                    println!("{output}");
                }
            }
            JobOutcome::TestFailure { .. } => {
                for group in report.tests.iter().flat_map(|t| &t.groups).filter(|g| g.failed()) {
                    println!("\n--- {} ---", format!("group {}", group.name).yellow());
                    for case in group.failed_cases() {
                        println!("  {} {}", "FAILED".red(), case.id);
                    }
                }
            }
            JobOutcome::Cancelled => println!("  cancelled before completion"),
            JobOutcome::Passed => {}
        }

        if let Some(SubmissionStatus::Failed { error, attempts }) = &report.submission {
            println!(
                "  {} after {attempts} attempt(s): {error}",
                "coverage submission failed".yellow()
            );
        }
        println!("\n{}", "-".repeat(80));
    }
}
