//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for the orchestrator,
//! including command execution, command templates, file system hygiene,
//! retry schedules and tracing setup.
//!
//! 此模块为编排器提供基础设施服务，
//! 包括命令执行、命令模板、文件系统清理、重试策略和 tracing 初始化。

pub mod command;
pub mod fs;
pub mod logging;
pub mod retry;
pub mod template;
