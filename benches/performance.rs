//! Performance benchmarks for the notification manager.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use notification_manager::{
    Journal, ManagerConfig, MemoryEventTypeStore, NotificationManager, NotificationParameters,
    RelayInterval, UserId,
};
use tempfile::TempDir;

fn create_manager(dir: &TempDir) -> NotificationManager<MemoryEventTypeStore> {
    let store = MemoryEventTypeStore::new().with_type(
        "chat",
        NotificationParameters::new()
            .with("class", "app")
            .with("icon", "chat")
            .with("sound", "ding"),
    );
    NotificationManager::new(
        ManagerConfig {
            data_dir: dir.path().join("data"),
            boot_marker_dir: dir.path().join("tmp"),
            relay_interval: RelayInterval::Immediate,
            max_wait_queue: 100,
        },
        store,
    )
    .unwrap()
}

fn chat(i: usize) -> NotificationParameters {
    NotificationParameters::new()
        .with("eventType", "chat")
        .with("summary", format!("message {}", i))
        .with("body", "x".repeat(200))
}

/// Add cost grows with the number of stored notifications (full rewrite)
fn bench_add_notification(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_notification");

    for existing in [0, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("existing", existing),
            &existing,
            |b, &existing| {
                let dir = TempDir::new().unwrap();
                let mut manager = create_manager(&dir);
                for i in 0..existing {
                    manager.add_notification(UserId(1), chat(i), None).unwrap();
                }

                b.iter(|| {
                    let id = manager.add_notification(UserId(1), chat(0), None).unwrap();
                    manager.remove_notification_now(black_box(id));
                });
            },
        );
    }

    group.finish();
}

fn bench_group_cascade(c: &mut Criterion) {
    c.bench_function("remove_group_50_members", |b| {
        let dir = TempDir::new().unwrap();
        let mut manager = create_manager(&dir);

        b.iter(|| {
            let group = manager.add_group(UserId(1), NotificationParameters::new()).unwrap();
            for i in 0..50 {
                manager.add_notification(UserId(1), chat(i), Some(group)).unwrap();
            }
            manager.remove_group(UserId(1), group).unwrap();
            black_box(manager.process_pending());
        });
    });
}

fn bench_journal_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_restore");

    for count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("notifications", count), &count, |b, &count| {
            let dir = TempDir::new().unwrap();
            {
                let mut manager = create_manager(&dir);
                for i in 0..count {
                    manager.add_notification(UserId(1), chat(i), None).unwrap();
                }
            }
            let journal = Journal::new(dir.path().join("data"), dir.path().join("tmp"));

            b.iter(|| {
                black_box(journal.load_notifications().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_event_type_modified(c: &mut Criterion) {
    c.bench_function("event_type_modified_500", |b| {
        let dir = TempDir::new().unwrap();
        let mut manager = create_manager(&dir);
        for i in 0..500 {
            manager.add_notification(UserId(1), chat(i), None).unwrap();
        }

        b.iter(|| {
            manager.event_type_modified(black_box("chat"));
        });
    });
}

criterion_group!(
    benches,
    bench_add_notification,
    bench_group_cascade,
    bench_journal_restore,
    bench_event_type_modified,
);
criterion_main!(benches);
