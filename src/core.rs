//! # Core Module / 核心模块
//!
//! The orchestration logic: configuration, matrix expansion, version
//! resolution, dependency installation, test execution, coverage merging,
//! and the pipeline that ties them together.
//!
//! 编排逻辑：配置、矩阵展开、版本解析、依赖安装、测试执行、覆盖率合并，
//! 以及将它们串联起来的流水线。

pub mod config;
pub mod coverage;
pub mod error;
pub mod installer;
pub mod matrix;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod trigger;

// Re-exports
pub use config::{PipelineConfig, ValidatedPipeline};
pub use models::{JobOutcome, JobSpec, ResolvedJob};
pub use pipeline::{JobReport, Pipeline, Plan};
