use criterion::{Criterion, criterion_group, criterion_main};
use matrix_orchestrator::config::PipelineConfig;
use matrix_orchestrator::core::coverage::{CoverageReport, merge};
use matrix_orchestrator::core::matrix::{Axis, Matrix, MatrixConfig};
use matrix_orchestrator::infra::template::{TemplateVars, render_command};
use std::hint::black_box;

fn group_lcov(group: usize) -> String {
    let mut text = String::new();
    for file in 0..40 {
        text.push_str(&format!("TN:\nSF:pypots/module_{file}.py\n"));
        for line in 1..=200u32 {
            text.push_str(&format!("DA:{line},{}\n", (line as usize + group) % 3));
        }
        text.push_str("end_of_record\n");
    }
    text
}

fn bench_matrix_expansion(c: &mut Criterion) {
    let config = MatrixConfig {
        axes: vec![
            Axis::new("os", &["ubuntu-latest", "windows-latest", "macOS-latest"]),
            Axis::new("runtime", &["3.7", "3.8", "3.9", "3.10", "3.11"]),
            Axis::new("framework", &["1.12.1", "1.13.1", "2.0.1", "2.1.0"]),
        ],
        exclude: Vec::new(),
    };
    let validated = PipelineConfig::example().validate().unwrap();

    c.bench_function("expand_and_resolve_matrix", |b| {
        b.iter(|| {
            let matrix = Matrix::new(black_box(&config)).unwrap();
            validated.resolver.resolve_all(matrix.jobs())
        });
    });
}

fn bench_lcov(c: &mut Criterion) {
    let texts: Vec<String> = (0..8).map(group_lcov).collect();
    let reports: Vec<CoverageReport> = texts
        .iter()
        .map(|t| CoverageReport::parse_lcov(t).unwrap())
        .collect();
    let names: Vec<String> = (0..8).map(|i| format!("group_{i}")).collect();

    c.bench_function("parse_group_lcov", |b| {
        b.iter(|| CoverageReport::parse_lcov(black_box(&texts[0])).unwrap());
    });

    c.bench_function("merge_eight_groups", |b| {
        b.iter(|| merge(names.iter().map(String::as_str).zip(reports.iter())));
    });
}

fn bench_render_command(c: &mut Criterion) {
    let mut vars = TemplateVars::new();
    vars.set("python", "/work/ubuntu-latest-3.10-1.13.1/venv/bin/python")
        .set("group_path", "tests/imputation")
        .set("cov_target", "pypots")
        .set("cov_config", ".coveragerc")
        .set("coverage_file", "/work/coverage/imputation.lcov");
    let template = PipelineConfig::example().tests.command;

    c.bench_function("render_test_command", |b| {
        b.iter(|| render_command(black_box(&template), &vars).unwrap());
    });
}

criterion_group!(benches, bench_matrix_expansion, bench_lcov, bench_render_command);
criterion_main!(benches);
