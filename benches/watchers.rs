use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use orokb::{
    InMemoryGraph, KnowledgeBase, KnowledgeConfig, MemoryProfile, TriggerMode, WatchEvent, WatchPattern,
};

fn seeded_kb(objects: usize) -> KnowledgeBase {
    let kb = KnowledgeBase::manual(KnowledgeConfig::default(), Box::new(InMemoryGraph::new())).unwrap();
    let statements: Vec<String> = (0..objects)
        .flat_map(|i| [format!("obj{i} type Object"), format!("obj{i} isOn shelf{}", i % 16)])
        .collect();
    kb.assert_strs(&statements, MemoryProfile::Permanent, false).unwrap();
    kb
}

fn bench_assert_without_watchers(c: &mut Criterion) {
    let mut group = c.benchmark_group("watchers/assert");
    group.throughput(Throughput::Elements(1));
    group.bench_function("no_watchers", |b| {
        b.iter_batched(
            || seeded_kb(256),
            |kb| kb.assert_str("cup isOn table", MemoryProfile::Permanent, false).unwrap(),
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_assert_with_watchers(c: &mut Criterion) {
    let mut group = c.benchmark_group("watchers/assert");
    for watchers in [1usize, 16, 64] {
        group.bench_function(format!("{watchers}_fact_watchers"), |b| {
            b.iter_batched(
                || {
                    let kb = seeded_kb(256);
                    let fired = Arc::new(AtomicUsize::new(0));
                    for i in 0..watchers {
                        let fired = Arc::clone(&fired);
                        kb.register_watcher(
                            &WatchPattern::facts([format!("?x isOn table{i}")], TriggerMode::OnToggle),
                            Arc::new(move |_: &WatchEvent| {
                                fired.fetch_add(1, Ordering::Relaxed);
                            }),
                        )
                        .unwrap();
                    }
                    kb
                },
                |kb| kb.assert_str("cup isOn table0", MemoryProfile::Permanent, false).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_instance_watcher(c: &mut Criterion) {
    c.bench_function("watchers/new_instance_of", |b| {
        b.iter_batched(
            || {
                let kb = seeded_kb(256);
                let sub = kb.subscribe(&WatchPattern::new_instance_of("Object")).unwrap();
                (kb, sub)
            },
            |(kb, sub)| {
                kb.assert_str("cup type Object", MemoryProfile::Permanent, false).unwrap();
                sub.stream.drain()
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_sweep(c: &mut Criterion) {
    c.bench_function("watchers/sweep_256_ephemeral", |b| {
        b.iter_batched(
            || {
                let kb = seeded_kb(0);
                let statements: Vec<String> = (0..256).map(|i| format!("blip{i} seenAt radar")).collect();
                kb.assert_strs(&statements, MemoryProfile::Ephemeral, false).unwrap();
                kb
            },
            |kb| kb.sweep_at(chrono::Utc::now() + chrono::Duration::days(1)).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    watchers,
    bench_assert_without_watchers,
    bench_assert_with_watchers,
    bench_instance_watcher,
    bench_sweep
);
criterion_main!(watchers);
