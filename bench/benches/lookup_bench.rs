//! Criterion benchmark harness: point lookups and batched inserts against the
//! embedded SQLite backend, plus the data generator on its own.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mongo_crdb_bench::backend::sqlite::{SqliteBackend, SqliteConfig};
use mongo_crdb_bench::backend::{BenchBackend, InsertMode, Tables};
use mongo_crdb_bench::populate::{self, ContentStyle, DataGen};
use mongo_crdb_bench::workloads;
use std::time::Duration;

/// Open a fresh database in `dir` with `users` rows in the main table.
fn setup_db(dir: &tempfile::TempDir, users: usize) -> (SqliteBackend, Vec<String>) {
    let config = SqliteConfig {
        path: dir.path().join("lookup.db"),
    };
    let mut backend = SqliteBackend::connect(&config).expect("Failed to open SQLite");
    workloads::setup(&mut backend).expect("Failed to create tables");
    let records = populate::users("user", "example.com", 42, users);
    backend
        .insert_users(&Tables::MAIN, &records, InsertMode::batched())
        .expect("Failed to populate");
    let names = records.into_iter().map(|u| u.username).collect();
    (backend, names)
}

fn bench_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup/sqlite");
    group.measurement_time(Duration::from_secs(10));

    for size in [1_000usize, 10_000] {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut backend, names) = setup_db(&dir, size);
        let mut rng = DataGen::new(42);

        group.bench_with_input(BenchmarkId::from_parameter(size), &names, |b, names| {
            b.iter(|| {
                let name = &names[rng.index(names.len())];
                backend
                    .find_user(&Tables::MAIN, name)
                    .expect("lookup failed")
            });
        });
    }
    group.finish();
}

fn bench_batched_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert/sqlite");
    group.sample_size(20);

    for chunk in [1usize, 100, 1000] {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteConfig {
            path: dir.path().join("insert.db"),
        };
        let mut backend = SqliteBackend::connect(&config).expect("Failed to open SQLite");
        let mut round = 0i64;

        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                round += 1;
                backend.reset_tables(&Tables::QUERY).expect("reset");
                let users = populate::users("b", "ex.com", round, 1000);
                backend
                    .insert_users(&Tables::QUERY, &users, InsertMode::Batched { chunk })
                    .expect("insert failed")
            });
        });
    }
    group.finish();
}

fn bench_generator(c: &mut Criterion) {
    let mut group = c.benchmark_group("populate");
    group.bench_function("text_200", |b| {
        let mut g = DataGen::new(42);
        b.iter(|| g.content(ContentStyle::Text(200)));
    });
    group.bench_function("posts_5000", |b| {
        let anchor = workloads::anchor_now();
        b.iter(|| {
            DataGen::new(42).posts(5000, 1000, ContentStyle::Sentence(10), Some((anchor, 14)))
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_point_lookup,
    bench_batched_insert,
    bench_generator
);
criterion_main!(benches);
