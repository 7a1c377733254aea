//! # Planner Benchmarks
//!
//! Performance benchmarks for conveyor-core transfer planning.
//!
//! Run with: `cargo bench -p conveyor-core`

use conveyor_core::{
    Directory, DirectoryKind, FileServer, Job, JobId, LogicalFile, Operation, PlannerConfig,
    ReplicaEntry, ReplicaStore, Site, SiteHandle, SiteStore, TransferLocationPolicy,
    TransferPlanner, Workflow, plan_to_bytes,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

struct NoPreference;
impl TransferLocationPolicy for NoPreference {}

const SITES: [&str; 4] = ["local", "east", "west", "archive"];

fn sites() -> SiteStore {
    SiteStore::from(
        SITES
            .iter()
            .map(|name| {
                let server = FileServer::new(format!("gsiftp://{name}.org"), "", Operation::All);
                Site::new(*name)
                    .with_directory(
                        Directory::new(DirectoryKind::SharedScratch, format!("/scratch/{name}"))
                            .with_server(server.clone()),
                    )
                    .with_directory(
                        Directory::new(DirectoryKind::SharedStorage, format!("/storage/{name}"))
                            .with_server(server),
                    )
            })
            .collect::<Vec<_>>(),
    )
}

/// A split job fanning out to `width` workers that alternate between two
/// sites, each reading one raw input and the split output, then a merge.
fn fan_out(width: usize) -> (Workflow, ReplicaStore) {
    let mut wf = Workflow::new("fanout");
    let mut replicas = ReplicaStore::new();
    wf.add_job(Job::new("split", "east").with_output(LogicalFile::new("split.out")));

    let mut merge = Job::new("merge", "east").with_output(LogicalFile::new("merged"));
    for i in 0..width {
        let site = if i % 2 == 0 { "east" } else { "west" };
        let raw = format!("raw_{i:05}");
        replicas.insert(
            raw.as_str(),
            ReplicaEntry::new(format!("gsiftp://archive.org/storage/archive/{raw}"), "archive"),
        );
        let out = format!("part_{i:05}");
        let id = JobId::new(format!("work_{i:05}"));
        wf.add_job(
            Job::new(id.clone(), site)
                .with_input(LogicalFile::new("split.out"))
                .with_input(LogicalFile::new(raw))
                .with_output(LogicalFile::new(out.as_str())),
        );
        merge = merge.with_input(LogicalFile::new(out));
        wf.add_dependency(&JobId::from("split"), &id).expect("edge");
    }
    wf.add_job(merge);
    for i in 0..width {
        wf.add_dependency(&JobId::new(format!("work_{i:05}")), &JobId::from("merge"))
            .expect("edge");
    }
    (wf, replicas)
}

fn config() -> PlannerConfig {
    PlannerConfig {
        output_sites: vec![SiteHandle::from("archive")],
        ..PlannerConfig::default()
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_plan_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_fan_out");
    let sites = sites();

    for width in [100, 1000, 5000].iter() {
        let (wf, replicas) = fan_out(*width);
        let planner = TransferPlanner::new(config(), &sites, &replicas).expect("planner");

        group.bench_with_input(BenchmarkId::from_parameter(width), &wf, |b, wf| {
            b.iter(|| black_box(planner.plan(wf, &[], &NoPreference)));
        });
    }

    group.finish();
}

fn bench_plan_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_to_bytes");
    let sites = sites();

    for width in [100, 1000].iter() {
        let (wf, replicas) = fan_out(*width);
        let planner = TransferPlanner::new(config(), &sites, &replicas).expect("planner");
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");

        group.bench_with_input(BenchmarkId::from_parameter(width), &plan, |b, plan| {
            b.iter(|| black_box(plan_to_bytes(plan)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan_fan_out, bench_plan_persistence);
criterion_main!(benches);
