//! Argv Matching Benchmarks
//!
//! Measures pattern matching and full registry scans over a synthetic
//! process table.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use procwatch_agent::TargetRegistry;
use procwatch_common::{
    matches_argv, Pid, ProcessEntry, ProcessTableScanner, ScanResult, Target, TargetSet,
};

/// Fixed in-memory process table
struct StaticTable(Vec<ProcessEntry>);

impl ProcessTableScanner for StaticTable {
    fn scan(&self) -> ScanResult<Vec<ProcessEntry>> {
        Ok(self.0.clone())
    }

    fn read_argv(&self, pid: Pid) -> Option<Vec<String>> {
        self.0.iter().find(|e| e.pid == pid).map(|e| e.argv.clone())
    }
}

/// Generate a process table where roughly one process in `match_every`
/// runs the benchmarked script
fn generate_processes(count: usize, match_every: usize) -> Vec<ProcessEntry> {
    let commands: [&[&str]; 5] = [
        &["/usr/bin/python3", "-m", "http.server"],
        &["/bin/bash", "--login"],
        &["/usr/sbin/nginx", "-g", "daemon off;"],
        &["node", "/srv/app/index.js", "--port", "8080"],
        &["/usr/lib/systemd/systemd-journald"],
    ];

    (0..count)
        .map(|i| {
            let argv: Vec<String> = if i % match_every == 0 {
                vec!["sh".into(), "app.sh".into(), format!("--worker={}", i)]
            } else {
                commands[i % commands.len()].iter().map(|s| s.to_string()).collect()
            };
            ProcessEntry::new(1000 + i as Pid, argv)
        })
        .collect()
}

fn create_targets() -> TargetSet {
    TargetSet::compile(vec![
        Target::new("app", vec!["sh".into(), "app.sh".into()], false),
        Target::new("web", vec!["/usr/sbin/nginx".into(), "-g".into(), "*".into()], true),
        Target::new("py", vec!["/usr/bin/python*".into(), "-m".into()], false),
    ])
    .unwrap()
}

fn argv_matching_single(c: &mut Criterion) {
    let pattern = ["sh", "-c", "*"];
    let hit = ["sh", "-c", "echo hi", "--verbose"];
    let miss = ["bash", "-c", "echo hi"];

    let mut group = c.benchmark_group("argv_match_single");
    group.bench_function("hit", |b| b.iter(|| matches_argv(black_box(&pattern), black_box(&hit))));
    group.bench_function("miss", |b| b.iter(|| matches_argv(black_box(&pattern), black_box(&miss))));
    group.finish();
}

fn compiled_target_matching(c: &mut Criterion) {
    let targets = create_targets();
    let processes = generate_processes(1000, 10);

    let mut group = c.benchmark_group("compiled_target_batch");
    group.throughput(Throughput::Elements(processes.len() as u64));
    group.bench_function("first_match", |b| {
        b.iter(|| {
            processes
                .iter()
                .filter(|p| targets.iter().any(|t| t.matches(&p.argv).unwrap_or(false)))
                .count()
        })
    });
    group.finish();
}

fn registry_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_scan");

    for count in [100, 1000, 5000] {
        let table = StaticTable(generate_processes(count, 50));
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &table, |b, table| {
            let mut registry = TargetRegistry::new(create_targets());
            b.iter(|| registry.scan(black_box(table)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, argv_matching_single, compiled_target_matching, registry_scan);
criterion_main!(benches);
