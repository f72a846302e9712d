//! # CLI Commands / CLI 命令
//!
//! One module per subcommand.
//!
//! 每个子命令一个模块。

pub mod init;
pub mod plan;
pub mod run;

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::TriggerArgs;
use crate::core::config::{self, ValidatedPipeline};
use crate::core::error::ConfigurationError;
use crate::core::trigger::TriggerEvent;

/// Loads and validates the pipeline declaration.
/// 加载并校验流水线声明。
pub(crate) fn load_validated(path: &Path) -> Result<ValidatedPipeline> {
    let pipeline = config::load_pipeline(path)?
        .validate()
        .with_context(|| format!("Invalid pipeline declaration in {}", path.display()))?;
    Ok(pipeline)
}

/// Whether any trigger information is available, from flags or the platform.
pub(crate) fn has_trigger(args: &TriggerArgs) -> bool {
    args.kind.is_some() || std::env::var("GITHUB_EVENT_NAME").is_ok_and(|v| !v.is_empty())
}

pub(crate) fn trigger_event(args: TriggerArgs) -> Result<TriggerEvent> {
    let event = TriggerEvent::from_platform(args.kind, args.source, args.target).map_err(|message| {
        ConfigurationError::InvalidValue {
            key: "trigger",
            message,
        }
    })?;
    Ok(event)
}
