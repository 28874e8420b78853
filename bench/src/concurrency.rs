//! Concurrent point-lookup load driver.
//!
//! `W` scoped worker threads, each with its own connection and its own random
//! sub-stream, run `R` username lookups against a shared read-only keyspace.
//! The wall clock covers the whole phase, connection opening included.

use crate::backend::{BenchBackend, Tables};
use crate::populate::DataGen;
use crate::stats::LatencySamples;
use crate::timing::as_ms;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on keyspace size.
pub const KEYSPACE_CAP: usize = 1000;
pub const DEFAULT_REPS: usize = 100;
/// Worker counts measured by the concurrency workload.
pub const THREAD_COUNTS: [usize; 2] = [10, 50];

/// Sub-stream offsets per backend; worker `i` uses `offset + i`.
pub const MONGO_STREAM_OFFSET: u64 = 0;
pub const COCKROACH_STREAM_OFFSET: u64 = 10_000;
pub const SQLITE_STREAM_OFFSET: u64 = 20_000;

/// Aggregates of one load phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyStats {
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub throughput_qps: f64,
    pub n_threads: usize,
    pub n_ops: usize,
    /// Wall time of the whole phase in seconds. Not part of the artifact.
    #[serde(skip)]
    pub elapsed_s: f64,
}

/// Completed operations per second of wall time; zero for an unmeasurable
/// (zero-length) phase.
pub fn throughput_qps(n_ops: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        n_ops as f64 / secs
    } else {
        0.0
    }
}

/// Sorted intersection of every username set, capped at `cap` entries.
pub fn shared_keyspace(sets: &[Vec<String>], cap: usize) -> Vec<String> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    let mut common: BTreeSet<&str> = first.iter().map(String::as_str).collect();
    for set in rest {
        let other: BTreeSet<&str> = set.iter().map(String::as_str).collect();
        common.retain(|name| other.contains(name));
    }
    common.into_iter().take(cap).map(str::to_string).collect()
}

/// Run `workers × reps` point lookups of `B` and aggregate the latencies.
///
/// Aborts before spawning anything if `keys` is empty. Any worker error (or
/// panic) fails the whole measurement, as does a phase that ran no lookups
/// (no workers or `reps == 0`).
pub fn run_point_lookups<B: BenchBackend>(
    config: &B::Config,
    tables: &Tables,
    keys: &[String],
    workers: usize,
    reps: usize,
    seed: i64,
    stream_offset: u64,
) -> Result<ConcurrencyStats> {
    if keys.is_empty() {
        bail!("keyspace is empty; nothing to look up");
    }

    let start = Instant::now();
    let per_worker: Vec<Result<Vec<f64>>> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|idx| {
                s.spawn(move || -> Result<Vec<f64>> {
                    let mut conn = B::connect(config)
                        .with_context(|| format!("worker {idx}: connect"))?;
                    let mut rng = DataGen::stream(seed, stream_offset + idx as u64);
                    let mut samples = Vec::with_capacity(reps);
                    for _ in 0..reps {
                        let key = &keys[rng.index(keys.len())];
                        let t0 = Instant::now();
                        conn.find_user(tables, key)
                            .with_context(|| format!("worker {idx}: lookup {key}"))?;
                        samples.push(as_ms(t0.elapsed()));
                    }
                    Ok(samples)
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(idx, h)| {
                h.join()
                    .unwrap_or_else(|_| Err(anyhow!("worker {idx} panicked")))
            })
            .collect()
    });
    let elapsed = start.elapsed();

    let mut samples = LatencySamples::with_capacity(workers * reps);
    for worker in per_worker {
        samples.extend(worker?);
    }
    if samples.is_empty() {
        bail!("no lookups ran ({workers} workers × {reps} reps)");
    }
    let n_ops = samples.len();
    debug!("{workers} workers produced {n_ops} samples in {elapsed:.3?}");

    let stats = ConcurrencyStats {
        avg_ms: samples.mean_ms(),
        p95_ms: samples.p95_ms(),
        throughput_qps: throughput_qps(n_ops, elapsed),
        n_threads: workers,
        n_ops,
        elapsed_s: elapsed.as_secs_f64(),
    };
    info!(
        "{workers} threads: avg {:.3} ms, p95 {:.3} ms, {:.1} ops/s",
        stats.avg_ms, stats.p95_ms, stats.throughput_qps
    );
    Ok(stats)
}
