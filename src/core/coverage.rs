//! # Coverage Aggregation Module / 覆盖率聚合模块
//!
//! Line coverage per source file, read from and written to LCOV. Each test
//! group produces its own report. The job's report is the merge of the set of
//! group reports: hits are summed across distinct groups, and a group whose
//! report is added twice counts once. Files and lines are kept in ordered
//! maps, so the LCOV output is byte-identical for the same data.
//!
//! 按源文件统计的行覆盖率，以 LCOV 格式读写。每个测试分组产生自己的报告。
//! 作业的报告是分组报告集合的合并：不同分组之间的命中次数相加，同一个分组的报告
//! 被添加两次时只计一次。文件和行都保存在有序映射中，因此相同数据的 LCOV 输出逐字节一致。

use crate::core::error::CoverageError;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Normalizes a source path for merging: forward slashes, no leading `./`.
/// 规范化源文件路径以便合并：使用正斜杠，去掉开头的 `./`。
pub fn normalize_path(path: &str) -> String {
    let forward = path.trim().replace('\\', "/");
    let mut rest = forward.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

/// Line hits per source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    files: BTreeMap<String, BTreeMap<u32, u64>>,
}

/// Totals over a report, as LCOV's `LF`/`LH` count them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub files: usize,
    pub lines_found: usize,
    pub lines_hit: usize,
}

impl CoverageSummary {
    /// Percentage of instrumented lines that were hit. `0.0` when nothing was instrumented.
    pub fn percent(&self) -> f64 {
        if self.lines_found == 0 {
            0.0
        } else {
            self.lines_hit as f64 * 100.0 / self.lines_found as f64
        }
    }
}

impl CoverageReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registers a file even if no line of it is instrumented.
    pub fn touch_file(&mut self, path: &str) {
        self.files.entry(normalize_path(path)).or_default();
    }

    /// Adds `hits` to one line. Counts saturate at `u64::MAX`.
    pub fn record(&mut self, path: &str, line: u32, hits: u64) {
        let slot = self
            .files
            .entry(normalize_path(path))
            .or_default()
            .entry(line)
            .or_default();
        *slot = slot.saturating_add(hits);
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &BTreeMap<u32, u64>)> {
        self.files.iter().map(|(path, lines)| (path.as_str(), lines))
    }

    pub fn file(&self, path: &str) -> Option<&BTreeMap<u32, u64>> {
        self.files.get(&normalize_path(path))
    }

    pub fn hits(&self, path: &str, line: u32) -> Option<u64> {
        self.file(path).and_then(|lines| lines.get(&line).copied())
    }

    /// Sums another report into this one.
    /// 将另一个报告的命中次数累加到当前报告中。
    pub fn absorb(&mut self, other: &CoverageReport) {
        for (path, lines) in &other.files {
            let target = self.files.entry(path.clone()).or_default();
            for (line, hits) in lines {
                let slot = target.entry(*line).or_default();
                *slot = slot.saturating_add(*hits);
            }
        }
    }

    /// Per-line maximum of two reports. Used when the same group reports twice.
    fn overlay(&mut self, other: &CoverageReport) {
        for (path, lines) in &other.files {
            let target = self.files.entry(path.clone()).or_default();
            for (line, hits) in lines {
                let slot = target.entry(*line).or_default();
                *slot = (*slot).max(*hits);
            }
        }
    }

    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary {
            files: self.files.len(),
            ..CoverageSummary::default()
        };
        for lines in self.files.values() {
            summary.lines_found += lines.len();
            summary.lines_hit += lines.values().filter(|h| **h > 0).count();
        }
        summary
    }

    /// Parses LCOV text. Only `SF`, `DA` and `end_of_record` carry data; every
    /// other record (`TN`, `FN`, `BRDA`, `LF`, ...) is accepted and ignored.
    ///
    /// 解析 LCOV 文本。只有 `SF`、`DA` 和 `end_of_record` 携带数据；
    /// 其他记录（`TN`、`FN`、`BRDA`、`LF` 等）会被接受并忽略。
    pub fn parse_lcov(text: &str) -> Result<Self, CoverageError> {
        let mut report = Self::new();
        let mut current: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if let Some(path) = line.strip_prefix("SF:") {
                report.touch_file(path);
                current = Some(path.to_string());
            } else if let Some(data) = line.strip_prefix("DA:") {
                let Some(path) = current.as_deref() else {
                    return Err(CoverageError::RecordOutsideFile { line: line_no });
                };
                let malformed = || CoverageError::MalformedRecord {
                    line: line_no,
                    record: line.to_string(),
                };
                let mut fields = data.split(',');
                let number = fields
                    .next()
                    .and_then(|f| f.trim().parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(malformed)?;
                let hits = fields
                    .next()
                    .and_then(|f| f.trim().parse::<u64>().ok())
                    .ok_or_else(malformed)?;
                report.record(path, number, hits);
            } else if line == "end_of_record" {
                current = None;
            }
        }
        Ok(report)
    }

    /// Reads an LCOV file.
    pub fn read_lcov(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse_lcov(&text)?)
    }

    /// Renders the report as LCOV, files and lines in ascending order.
    /// 将报告渲染为 LCOV，文件和行均按升序排列。
    pub fn to_lcov(&self, test_name: &str) -> String {
        let mut out = String::new();
        for (path, lines) in &self.files {
            out.push_str(&format!("TN:{test_name}\nSF:{path}\n"));
            for (line, hits) in lines {
                out.push_str(&format!("DA:{line},{hits}\n"));
            }
            let hit = lines.values().filter(|h| **h > 0).count();
            out.push_str(&format!("LF:{}\nLH:{hit}\nend_of_record\n", lines.len()));
        }
        out
    }

    pub fn write_lcov(&self, path: &Path, test_name: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_lcov(test_name))
    }
}

/// Collects group reports as a set keyed by group name, then sums them.
/// The result does not depend on the order reports are added in.
///
/// 以分组名为键将分组报告收集为集合，然后求和。结果与添加顺序无关。
#[derive(Debug, Clone, Default)]
pub struct CoverageMerge {
    groups: BTreeMap<String, CoverageReport>,
}

impl CoverageMerge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group's report. Adding the same group again keeps the per-line
    /// maximum, so an identical report changes nothing.
    pub fn add(&mut self, group: &str, report: &CoverageReport) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .overlay(report);
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn finish(&self) -> CoverageReport {
        let mut merged = CoverageReport::new();
        for report in self.groups.values() {
            merged.absorb(report);
        }
        merged
    }
}

/// Merges named group reports into one report.
pub fn merge<'a>(groups: impl IntoIterator<Item = (&'a str, &'a CoverageReport)>) -> CoverageReport {
    let mut merge = CoverageMerge::new();
    for (name, report) in groups {
        merge.add(name, report);
    }
    merge.finish()
}
