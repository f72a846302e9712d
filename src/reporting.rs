//! # Reporting Module / 报告模块
//!
//! Console summaries, the HTML matrix report, and coverage submission to
//! external tracking services.
//!
//! 控制台摘要、HTML 矩阵报告，以及向外部跟踪服务提交覆盖率。

pub mod console;
pub mod html;
pub mod submit;

pub use console::{print_failure_details, print_summary};
pub use html::generate_html_report;
pub use submit::{CoverageSink, CoverallsSink, FileSink, Submission, SubmissionStatus};
