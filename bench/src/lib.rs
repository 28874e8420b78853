//! MongoDB vs CockroachDB Benchmark Harness
//!
//! Measures CRUD and query latency/throughput of a document store (MongoDB)
//! against a distributed SQL store (CockroachDB) under identical, seed-driven
//! workloads, and persists every measurement as a JSON artifact that the
//! report step turns into CSV/Markdown summaries.
//!
//! Every workload follows the same linear shape:
//! - generate synthetic users/posts from `SEED` ([`populate`])
//! - run the timed operations against each backend in turn ([`workloads`],
//!   [`timing`], [`concurrency`])
//! - write `<backend> → <metric> → value` to a fixed file ([`results`])
//!
//! Backends implement [`backend::BenchBackend`]. An embedded SQLite backend
//! is included as an in-process reference and is what the tests run against.
//!
//! Run benchmarks: `cargo run --release -- all`
//! Run tests: `cargo test`

pub mod backend;
pub mod concurrency;
pub mod config;
pub mod logging;
pub mod populate;
pub mod report;
pub mod results;
pub mod stats;
pub mod timing;
pub mod workloads;
