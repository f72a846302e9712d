//! # Matrix Orchestrator Library / Matrix Orchestrator 库
//!
//! Core functionality of the Matrix Orchestrator tool: a configuration-driven
//! CI test-matrix orchestrator that expands build axes into jobs, installs
//! each job's layered dependencies, runs the test suite in parallel groups
//! and submits merged coverage.
//!
//! Matrix Orchestrator 工具的核心功能：一个配置驱动的 CI 测试矩阵编排器，
//! 它将构建轴展开为作业，为每个作业安装分层依赖，以并行分组运行测试套件，
//! 并提交合并后的覆盖率。
//!
//! ## Modules / 模块
//!
//! - `core` - Matrix, resolver, installer, runner, coverage and pipeline
//! - `infra` - Process execution, command templates, file system, logging and retry
//! - `reporting` - Console and HTML reports, coverage submission
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 矩阵、解析器、安装器、运行器、覆盖率和流水线
//! - `infra` - 进程执行、命令模板、文件系统、日志和重试
//! - `reporting` - 控制台与 HTML 报告、覆盖率提交
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::config;
pub use core::models;
pub use core::pipeline;
