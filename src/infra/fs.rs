//! # File System Operations Module / 文件系统操作模块
//!
//! Per-job working directories and removal of stale artifacts left over
//! from previous runs.
//!
//! 每个作业的工作目录，以及清理之前运行遗留的陈旧产物。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Collects every directory under `root` whose file name is in `names`.
/// Matching directories are not descended into.
///
/// 收集 `root` 下所有文件名在 `names` 中的目录。匹配的目录不会再向下遍历。
pub fn find_named_dirs(root: &Path, names: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name();
            if names.iter().any(|n| name.to_str() == Some(n.as_str())) {
                found.push(path);
            } else {
                pending.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Removes stale cache directories (bytecode caches, test-runner caches)
/// under `root` plus any `extra` paths that exist. Returns what was removed.
///
/// 删除 `root` 下陈旧的缓存目录（字节码缓存、测试运行器缓存）以及存在的 `extra` 路径。
/// 返回被删除的路径。
pub fn clear_stale_artifacts(root: &Path, names: &[String], extra: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut doomed = find_named_dirs(root, names)?;
    doomed.extend(extra.iter().filter(|p| p.exists()).cloned());

    if !doomed.is_empty() {
        fs_extra::remove_items(&doomed).with_context(|| {
            format!("Failed to remove stale artifacts under {}", root.display())
        })?;
    }
    Ok(doomed)
}

/// Creates (if needed) and returns `<work_dir>/<slug>`.
pub fn job_dir(work_dir: &Path, slug: &str) -> Result<PathBuf> {
    let dir = work_dir.join(slug);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create job directory: {}", dir.display()))?;
    Ok(dir)
}

/// Path of the interpreter inside a virtual environment.
/// 虚拟环境中解释器的路径。
pub fn venv_python(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}
